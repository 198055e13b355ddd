use std::io;
use std::sync::Arc;

/// Errors raised by a [`Codec`](crate::codec::Codec) while turning values into cookie tokens and back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("securecookie: hash key is not set")]
    HashKeyNotSet,

    #[error("securecookie: block key must be 16, 24 or 32 bytes (got {0})")]
    InvalidBlockKey(usize),

    #[error("securecookie: the value is too long")]
    ValueTooLong,

    #[error("securecookie: base64 decode failed")]
    Base64,

    #[error("securecookie: the value is not valid")]
    InvalidToken,

    #[error("securecookie: the value is not valid (mac mismatch)")]
    MacInvalid,

    #[error("securecookie: expired timestamp")]
    Expired,

    #[error("securecookie: timestamp is too new")]
    TimestampTooNew,

    #[error("securecookie: the value could not be encrypted")]
    Encrypt,

    #[error("securecookie: the value could not be decrypted")]
    Decrypt,

    #[error("securecookie: serialization failed: {0}")]
    Serialize(String),

    #[error("securecookie: deserialization failed: {0}")]
    Deserialize(String),

    #[error("securecookie: no codecs provided")]
    NoCodecs,

    #[error("{}", join_errors(.0))]
    Multiple(Vec<CodecError>),
}

/// Errors surfaced by stores, sessions and the registry.
///
/// Every variant is cheap to clone so the registry can hand the same error back
/// on each lookup within a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("sessions: invalid character in cookie name: {0}")]
    InvalidCookieName(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("sessions: I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("sessions: cannot convert session value: {0}")]
    Value(String),

    #[error("sessions: cannot build Set-Cookie header: {0}")]
    Header(String),

    #[error("sessions: missing store for session {0:?}")]
    StoreDropped(String),

    #[error("sessions: error saving session {name:?} -- {source}")]
    Save {
        name: String,
        #[source]
        source: Box<SessionError>,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<SessionError>),
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(Arc::new(err))
    }
}

impl SessionError {
    /// Returns true when the error came from decoding or verifying a token.
    pub fn is_decode(&self) -> bool {
        matches!(self, SessionError::Codec(_))
    }

    /// Returns true when the error came from the filesystem.
    pub fn is_io(&self) -> bool {
        matches!(self, SessionError::Io(_))
    }
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    match errors.len() {
        0 => "(0 errors)".to_string(),
        1 => errors[0].to_string(),
        n => format!("{} (and {} other errors)", errors[0], n - 1),
    }
}
