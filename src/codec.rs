//! Codecs: authenticate/encrypt session payloads for transport in cookies.
//!
//! A [`Codec`] turns a named byte payload into an opaque, cookie-safe token and
//! back. Stores hold an **ordered list** of codecs to support key rotation:
//! encoding uses the first codec that succeeds, decoding tries each codec in
//! turn until one accepts the token.
//!
//! [`encode_multi`] and [`decode_multi`] add the serialization boundary on top:
//! values are converted to JSON with `serde_json` before they reach a codec.
//!
//! The crate ships one implementation, [`SecureCookie`], which signs with
//! HMAC-SHA256 and optionally encrypts with AES-GCM.
//!
//! ```rust
//! use gosub_sessions::codec::{codecs_from_pairs, decode_multi, encode_multi, KeyPair};
//! use std::collections::HashMap;
//!
//! let codecs = codecs_from_pairs(&[KeyPair::new(b"hash-key".to_vec())]).unwrap();
//! let mut values = HashMap::new();
//! values.insert("user".to_string(), 42);
//!
//! let token = encode_multi("session", &values, &codecs).unwrap();
//! let back: HashMap<String, i32> = decode_multi("session", &token, &codecs).unwrap();
//! assert_eq!(back, values);
//! ```

mod secure_cookie;

use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::CodecError;

pub use secure_cookie::SecureCookie;

/// Authenticate/encrypt and verify/decrypt a named payload.
///
/// The `name` is bound into the token so a value issued for one cookie cannot
/// be replayed under another name.
pub trait Codec: Send + Sync {
    /// Encodes `value` into a cookie-safe token.
    fn encode(&self, name: &str, value: &[u8]) -> Result<String, CodecError>;

    /// Verifies `token` and returns the payload it carries.
    fn decode(&self, name: &str, token: &str) -> Result<Vec<u8>, CodecError>;

    /// Sets the maximum token age in seconds. Codecs without an age ceiling ignore this.
    fn set_max_age(&mut self, _age: i64) {}

    /// Sets the maximum encoded length. Codecs without a length limit ignore this.
    fn set_max_length(&mut self, _len: usize) {}
}

/// One entry of a key rotation list.
///
/// The hash key authenticates the token and is required. The block key, when
/// present, encrypts it and must be 16, 24 or 32 bytes long.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub hash_key: Vec<u8>,
    pub block_key: Option<Vec<u8>>,
}

impl KeyPair {
    /// Creates an authentication-only key pair.
    pub fn new(hash_key: impl Into<Vec<u8>>) -> Self {
        Self { hash_key: hash_key.into(), block_key: None }
    }

    /// Creates a key pair that authenticates and encrypts.
    pub fn with_encryption(hash_key: impl Into<Vec<u8>>, block_key: impl Into<Vec<u8>>) -> Self {
        Self { hash_key: hash_key.into(), block_key: Some(block_key.into()) }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("hash_key", &format_args!("[{} bytes]", self.hash_key.len()))
            .field("block_key", &self.block_key.as_ref().map(|k| k.len()))
            .finish()
    }
}

/// Builds one [`SecureCookie`] per key pair, in rotation order.
pub fn codecs_from_pairs(pairs: &[KeyPair]) -> Result<Vec<Box<dyn Codec>>, CodecError> {
    pairs
        .iter()
        .map(|pair| {
            SecureCookie::new(&pair.hash_key, pair.block_key.as_deref())
                .map(|codec| Box::new(codec) as Box<dyn Codec>)
        })
        .collect()
}

/// Serializes `value` and encodes it with the first codec that succeeds.
pub fn encode_multi<T>(name: &str, value: &T, codecs: &[Box<dyn Codec>]) -> Result<String, CodecError>
where
    T: Serialize + ?Sized,
{
    if codecs.is_empty() {
        return Err(CodecError::NoCodecs);
    }
    let payload = serde_json::to_vec(value).map_err(|e| CodecError::Serialize(e.to_string()))?;

    let mut errors = Vec::new();
    for codec in codecs {
        match codec.encode(name, &payload) {
            Ok(token) => return Ok(token),
            Err(e) => errors.push(e),
        }
    }
    Err(CodecError::Multiple(errors))
}

/// Decodes `token` with the first codec that accepts it and deserializes the payload.
pub fn decode_multi<T>(name: &str, token: &str, codecs: &[Box<dyn Codec>]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    if codecs.is_empty() {
        return Err(CodecError::NoCodecs);
    }

    let mut errors = Vec::new();
    for codec in codecs {
        match codec.decode(name, token) {
            Ok(payload) => {
                return serde_json::from_slice(&payload).map_err(|e| CodecError::Deserialize(e.to_string()));
            }
            Err(e) => errors.push(e),
        }
    }
    Err(CodecError::Multiple(errors))
}

/// Returns `len` bytes from the thread-local CSPRNG, suitable as a hash or block key.
pub fn generate_random_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    rand::rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    fn codecs(pairs: &[KeyPair]) -> Vec<Box<dyn Codec>> {
        codecs_from_pairs(pairs).expect("valid key pairs")
    }

    #[test]
    fn roundtrip_through_signed_and_encrypted_codecs() {
        let signed = codecs(&[KeyPair::new(generate_random_key(32))]);
        let sealed = codecs(&[KeyPair::with_encryption(generate_random_key(64), generate_random_key(32))]);

        let mut values: HashMap<String, serde_json::Value> = HashMap::new();
        values.insert("count".into(), serde_json::json!(3));
        values.insert("profile".into(), serde_json::to_value(Profile { id: 7, name: "ana".into() }).unwrap());

        for chain in [&signed, &sealed] {
            let token = encode_multi("session", &values, chain).unwrap();
            let back: HashMap<String, serde_json::Value> = decode_multi("session", &token, chain).unwrap();
            assert_eq!(back, values);
        }
    }

    #[test]
    fn rotated_keys_still_decode_old_tokens() {
        let old = KeyPair::new(b"old-hash-key".to_vec());
        let new = KeyPair::new(b"new-hash-key".to_vec());

        let token = encode_multi("s", &"payload", &codecs(&[old.clone()])).unwrap();
        let rotated = codecs(&[new, old]);
        let value: String = decode_multi("s", &token, &rotated).unwrap();
        assert_eq!(value, "payload");
    }

    #[test]
    fn unknown_key_reports_every_failure() {
        let token = encode_multi("s", &1, &codecs(&[KeyPair::new(b"a".to_vec())])).unwrap();
        let other = codecs(&[KeyPair::new(b"b".to_vec()), KeyPair::new(b"c".to_vec())]);

        match decode_multi::<i32>("s", &token, &other) {
            Err(CodecError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn empty_codec_list_is_an_error() {
        assert_eq!(encode_multi("s", &1, &[]), Err(CodecError::NoCodecs));
        assert_eq!(decode_multi::<i32>("s", "x", &[]), Err(CodecError::NoCodecs));
    }

    #[test]
    fn invalid_block_key_is_rejected_at_construction() {
        let err = codecs_from_pairs(&[KeyPair::with_encryption(b"hash".to_vec(), vec![0u8; 7])]).err();
        assert_eq!(err, Some(CodecError::InvalidBlockKey(7)));
    }

    #[test]
    fn payload_of_wrong_shape_fails_to_deserialize() {
        let chain = codecs(&[KeyPair::new(b"k".to_vec())]);
        let token = encode_multi("s", &"not a map", &chain).unwrap();
        let res = decode_multi::<HashMap<String, i32>>("s", &token, &chain);
        assert!(matches!(res, Err(CodecError::Deserialize(_))));
    }

    #[test]
    fn key_pair_debug_hides_key_material() {
        let pair = KeyPair::with_encryption(b"supersecret".to_vec(), vec![1u8; 16]);
        let dbg = format!("{pair:?}");
        assert!(!dbg.contains("supersecret"));
        assert!(dbg.contains("11 bytes"));
    }
}
