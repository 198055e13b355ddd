pub mod codec;
pub mod config;
pub mod context;
pub mod cookies;
pub mod errors;
pub mod random;
pub mod registry;
pub mod session;
pub mod store;

pub use codec::KeyPair;
pub use config::{Options, SameSite};
pub use context::{get_session, save, RequestSessionsExt};
pub use errors::{CodecError, SessionError};
pub use registry::Registry;
pub use session::{Session, SessionHandle};
pub use store::{CookieStore, FilesystemStore, Lookup, Store, StoreExact};
