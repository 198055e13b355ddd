//! Filesystem-backed session store.
//!
//! Only the session **id** travels in the cookie. The values are encoded with
//! the same codec chain and written to `<path>/session_<id>`. Ids are 32 random
//! bytes rendered as unpadded base-32, so they are safe to use in file names.
use data_encoding::BASE32_NOPAD;
use http::HeaderMap;
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::codec::{codecs_from_pairs, decode_multi, encode_multi, Codec, KeyPair};
use crate::config::{Options, DEFAULT_MAX_LENGTH};
use crate::cookies::{cookie_values, Cookie};
use crate::errors::{CodecError, SessionError};
use crate::random::{RandomHandle, ThreadRandom};
use crate::registry::Registry;
use crate::session::Session;
use crate::store::{ensure_valid_name, first_matcher, Lookup, Matcher, Store, StoreExact, StoreId};

const FILE_PREFIX: &str = "session_";
const ID_BYTES: usize = 32;

lazy_static::lazy_static! {
    static ref SHARED_FILE_LOCK: SessionFileLock = SessionFileLock::new();
}

/// Reader/writer lock guarding session files.
///
/// Clones share the same lock. By default every [`FilesystemStore`] in the
/// process uses [`SessionFileLock::shared`].
#[derive(Clone, Default)]
pub struct SessionFileLock(Arc<RwLock<()>>);

impl SessionFileLock {
    /// Creates a lock that is not shared with any other store.
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(())))
    }

    /// Returns the process-wide lock.
    pub fn shared() -> Self {
        SHARED_FILE_LOCK.clone()
    }

    /// Returns true when both handles guard the same files.
    pub fn ptr_eq(&self, other: &SessionFileLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionFileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionFileLock").field(&Arc::as_ptr(&self.0)).finish()
    }
}

/// Configures a [`FilesystemStore`].
pub struct FilesystemStoreBuilder {
    path: PathBuf,
    key_pairs: Vec<KeyPair>,
    lock: Option<SessionFileLock>,
    random: Option<RandomHandle>,
    options: Options,
    max_length: usize,
}

impl Default for FilesystemStoreBuilder {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            key_pairs: Vec::new(),
            lock: None,
            random: None,
            options: Options::default(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl FilesystemStoreBuilder {
    /// Directory holding the session files. Empty means the system temp dir.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn key_pairs(mut self, pairs: &[KeyPair]) -> Self {
        self.key_pairs = pairs.to_vec();
        self
    }

    pub fn key_pair(mut self, pair: KeyPair) -> Self {
        self.key_pairs.push(pair);
        self
    }

    /// Uses `lock` instead of the process-wide lock.
    pub fn lock(mut self, lock: SessionFileLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Uses `random` to generate session ids.
    pub fn random(mut self, random: RandomHandle) -> Self {
        self.random = Some(random);
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Maximum encoded length of a session file. 0 disables the limit.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = len;
        self
    }

    pub fn build(self) -> Result<Arc<FilesystemStore>, SessionError> {
        let mut codecs = codecs_from_pairs(&self.key_pairs)?;
        for codec in codecs.iter_mut() {
            codec.set_max_length(self.max_length);
            codec.set_max_age(self.options.max_age);
        }

        let path = if self.path.as_os_str().is_empty() { std::env::temp_dir() } else { self.path };
        let lock = self.lock.unwrap_or_else(SessionFileLock::shared);
        let random = self.random.unwrap_or_else(|| Arc::new(ThreadRandom));
        let options = self.options;

        log::debug!("FilesystemStore: storing sessions in {}", path.display());

        Ok(Arc::new_cyclic(|me| FilesystemStore {
            id: StoreId::new(),
            codecs: RwLock::new(codecs),
            options: RwLock::new(options),
            path,
            lock,
            random,
            store_self: me.clone(),
        }))
    }
}

/// Stores session values in files, one file per session.
pub struct FilesystemStore {
    id: StoreId,
    codecs: RwLock<Vec<Box<dyn Codec>>>,
    options: RwLock<Options>,
    path: PathBuf,
    lock: SessionFileLock,
    random: RandomHandle,
    store_self: Weak<FilesystemStore>,
}

impl FilesystemStore {
    /// Creates a store writing to `path` (the system temp dir if empty).
    pub fn new(path: impl Into<PathBuf>, key_pairs: &[KeyPair]) -> Result<Arc<Self>, SessionError> {
        Self::builder().path(path).key_pairs(key_pairs).build()
    }

    pub fn builder() -> FilesystemStoreBuilder {
        FilesystemStoreBuilder::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_lock(&self) -> &SessionFileLock {
        &self.lock
    }

    /// Limits the encoded size of new sessions. 0 removes the limit.
    pub fn set_max_length(&self, len: usize) {
        for codec in self.codecs.write().unwrap_or_else(PoisonError::into_inner).iter_mut() {
            codec.set_max_length(len);
        }
    }

    /// Sets the default max age and the age ceiling of every codec.
    pub fn set_max_age(&self, age: i64) {
        self.update_options(|o| o.max_age = age);
        for codec in self.codecs.write().unwrap_or_else(PoisonError::into_inner).iter_mut() {
            codec.set_max_age(age);
        }
    }

    pub fn set_options(&self, options: Options) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    pub fn update_options(&self, f: impl FnOnce(&mut Options)) {
        f(&mut self.options.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn codecs(&self) -> RwLockReadGuard<'_, Vec<Box<dyn Codec>>> {
        self.codecs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_path(&self, id: &str) -> PathBuf {
        self.path.join(format!("{FILE_PREFIX}{id}"))
    }

    fn generate_id(&self) -> String {
        let mut bytes = [0u8; ID_BYTES];
        self.random.fill_bytes(&mut bytes);
        BASE32_NOPAD.encode(&bytes)
    }

    /// Reads `session_<id>` and decodes it into `session.values`.
    fn load(&self, session: &mut Session) -> Result<(), SessionError> {
        if !is_valid_id(&session.id) {
            return Err(CodecError::InvalidToken.into());
        }
        let filename = self.file_path(&session.id);
        let data = {
            let _guard = self.lock.read();
            fs::read_to_string(&filename)?
        };
        session.values = decode_multi(session.name(), &data, &self.codecs())?;
        log::trace!("FilesystemStore[{}]: loaded {}", self.id, filename.display());
        Ok(())
    }

    /// Writes the encoded values to `session_<id>` through a temp file.
    fn write(&self, session: &Session) -> Result<(), SessionError> {
        let encoded = encode_multi(session.name(), &session.values, &self.codecs())?;
        let filename = self.file_path(&session.id);
        let tmp = self.path.join(format!(".{FILE_PREFIX}{}.tmp", session.id));

        let _guard = self.lock.write();
        let written = write_private(&tmp, encoded.as_bytes()).and_then(|()| fs::rename(&tmp, &filename));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::trace!("FilesystemStore[{}]: wrote {}", self.id, filename.display());
        Ok(())
    }

    /// Removes the session file. A file that is already gone is not an error.
    fn erase(&self, session: &Session) -> Result<(), SessionError> {
        if !is_valid_id(&session.id) {
            return Ok(());
        }
        let filename = self.file_path(&session.id);

        // Shared lock, same as load.
        let _guard = self.lock.read();
        match fs::remove_file(&filename) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ids are generated as unpadded base-32, anything else never names a file.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

impl Store for FilesystemStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn options(&self) -> Options {
        self.options.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn get(&self, registry: &Registry, name: &str) -> Result<Lookup, SessionError> {
        registry.get(self, name)
    }

    fn new_session(&self, request: &HeaderMap, name: &str) -> Result<Lookup, SessionError> {
        self.new_exact(request, name, &first_matcher)
    }

    /// Deletes the file when `max_age <= 0`, otherwise writes it and sends the id.
    fn save(&self, _request: &HeaderMap, response: &mut HeaderMap, session: &mut Session) -> Result<(), SessionError> {
        ensure_valid_name(session.name())?;

        if session.options.is_expired() {
            self.erase(session)?;
            log::debug!("FilesystemStore[{}]: erased session {:?}", self.id, session.name());
            return Cookie::from_options(session.name(), "", &session.options).append_to(response);
        }

        if session.id.is_empty() {
            session.id = self.generate_id();
        }
        self.write(session)?;

        let encoded = encode_multi(session.name(), &session.id, &self.codecs())?;
        Cookie::from_options(session.name(), &encoded, &session.options).append_to(response)
    }

    fn as_exact(&self) -> Option<&dyn StoreExact> {
        Some(self)
    }
}

impl StoreExact for FilesystemStore {
    fn new_exact(&self, request: &HeaderMap, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError> {
        ensure_valid_name(name)?;
        let store: Weak<dyn Store> = self.store_self.clone();
        let mut session = Session::with_options(store, name, self.options());
        let mut error: Option<SessionError> = None;

        for token in cookie_values(request, name) {
            session.values.clear();
            session.id.clear();

            let id: String = match decode_multi(name, token, &self.codecs()) {
                Ok(id) => id,
                Err(e) => {
                    log::debug!("FilesystemStore[{}]: skipping undecodable {:?} cookie: {}", self.id, name, e);
                    error = Some(e.into());
                    continue;
                }
            };
            session.id = id;

            match self.load(&mut session) {
                Ok(()) => {
                    error = None;
                    if matcher(&session) {
                        session.is_new = false;
                        break;
                    }
                    session.values.clear();
                    session.id.clear();
                }
                // The id is kept, so saving rewrites the missing file.
                Err(e) => {
                    log::debug!("FilesystemStore[{}]: cannot load session {:?}: {}", self.id, name, e);
                    session.values.clear();
                    error = Some(e);
                }
            }
        }

        Ok(Lookup::new(session, error))
    }

    fn get_exact(&self, registry: &Registry, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError> {
        registry.get_exact(self, name, matcher)
    }
}
