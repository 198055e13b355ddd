//! HMAC-signed, optionally AES-GCM-encrypted cookie tokens.
//!
//! Token layout (before the outer base64url):
//!
//! ```text
//! <unix timestamp> "|" base64url(payload) "|" <hmac-sha256 tag>
//! ```
//!
//! The tag covers `name|timestamp|base64url(payload)`, which binds the token to
//! the cookie name it was issued for. When a block key is configured the
//! payload is sealed with AES-GCM first and the random nonce is prepended to
//! the ciphertext.
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::codec::Codec;
use crate::config::{DEFAULT_MAX_AGE, DEFAULT_MAX_LENGTH};
use crate::errors::CodecError;

type HmacSha256 = Hmac<Sha256>;
type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;

enum BlockCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CodecError> {
        let invalid = |_| CodecError::InvalidBlockKey(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(BlockCipher::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(BlockCipher::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(BlockCipher::Aes256).map_err(invalid),
            n => Err(CodecError::InvalidBlockKey(n)),
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let n = Nonce::<U12>::from_slice(&nonce);

        let sealed = match self {
            BlockCipher::Aes128(c) => c.encrypt(n, plaintext),
            BlockCipher::Aes192(c) => c.encrypt(n, plaintext),
            BlockCipher::Aes256(c) => c.encrypt(n, plaintext),
        }
        .map_err(|_| CodecError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() < NONCE_LEN {
            return Err(CodecError::Decrypt);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let n = Nonce::<U12>::from_slice(nonce);

        match self {
            BlockCipher::Aes128(c) => c.decrypt(n, ciphertext),
            BlockCipher::Aes192(c) => c.decrypt(n, ciphertext),
            BlockCipher::Aes256(c) => c.decrypt(n, ciphertext),
        }
        .map_err(|_| CodecError::Decrypt)
    }
}

/// Signs (and optionally encrypts) cookie values.
pub struct SecureCookie {
    hash: HmacSha256,
    block: Option<BlockCipher>,
    /// Maximum token age in seconds, 0 disables the check.
    max_age: i64,
    /// Minimum token age in seconds, 0 disables the check.
    min_age: i64,
    /// Maximum encoded length, 0 disables the check.
    max_length: usize,
}

impl SecureCookie {
    /// Creates a codec from a hash key and an optional 16/24/32 byte block key.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, CodecError> {
        if hash_key.is_empty() {
            return Err(CodecError::HashKeyNotSet);
        }
        let hash = <HmacSha256 as Mac>::new_from_slice(hash_key).map_err(|_| CodecError::HashKeyNotSet)?;
        let block = block_key.map(BlockCipher::new).transpose()?;

        Ok(Self {
            hash,
            block,
            max_age: DEFAULT_MAX_AGE,
            min_age: 0,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Rejects tokens younger than `age` seconds.
    pub fn set_min_age(&mut self, age: i64) {
        self.min_age = age;
    }

    pub fn is_encrypted(&self) -> bool {
        self.block.is_some()
    }

    fn mac(&self, name: &str, timestamp: &[u8], value: &[u8]) -> HmacSha256 {
        let mut mac = self.hash.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp);
        mac.update(b"|");
        mac.update(value);
        mac
    }

    fn encode_at(&self, name: &str, value: &[u8], now: i64) -> Result<String, CodecError> {
        let payload = match &self.block {
            Some(block) => block.seal(value)?,
            None => value.to_vec(),
        };
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = now.to_string();

        let tag = self.mac(name, timestamp.as_bytes(), encoded.as_bytes()).finalize().into_bytes();

        let mut body = Vec::with_capacity(timestamp.len() + encoded.len() + tag.len() + 2);
        body.extend_from_slice(timestamp.as_bytes());
        body.push(b'|');
        body.extend_from_slice(encoded.as_bytes());
        body.push(b'|');
        body.extend_from_slice(&tag);

        let token = URL_SAFE_NO_PAD.encode(body);
        if self.max_length != 0 && token.len() > self.max_length {
            return Err(CodecError::ValueTooLong);
        }
        Ok(token)
    }

    fn decode_at(&self, name: &str, token: &str, now: i64) -> Result<Vec<u8>, CodecError> {
        if self.max_length != 0 && token.len() > self.max_length {
            return Err(CodecError::ValueTooLong);
        }
        let body = URL_SAFE_NO_PAD.decode(token).map_err(|_| CodecError::Base64)?;

        let mut parts = body.splitn(3, |b| *b == b'|');
        let (timestamp, encoded, tag) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(v), Some(m)) => (t, v, m),
            _ => return Err(CodecError::InvalidToken),
        };

        self.mac(name, timestamp, encoded)
            .verify_slice(tag)
            .map_err(|_| CodecError::MacInvalid)?;

        let issued: i64 = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|t| t.parse().ok())
            .ok_or(CodecError::InvalidToken)?;
        if self.min_age != 0 && issued > now - self.min_age {
            return Err(CodecError::TimestampTooNew);
        }
        if self.max_age != 0 && issued < now - self.max_age {
            return Err(CodecError::Expired);
        }

        let payload = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| CodecError::Base64)?;
        match &self.block {
            Some(block) => block.open(&payload),
            None => Ok(payload),
        }
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Codec for SecureCookie {
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError> {
        self.encode_at(name, value, now())
    }

    fn decode(&self, name: &str, token: &str) -> Result<Vec<u8>, CodecError> {
        self.decode_at(name, token, now())
    }

    fn set_max_age(&mut self, age: i64) {
        self.max_age = age;
    }

    fn set_max_length(&mut self, len: usize) {
        self.max_length = len;
    }
}
