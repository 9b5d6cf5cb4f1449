//! Authenticated symmetric encryption for embedded timestamp ciphertexts.
//!
//! Uses NaCl's `SecretBox` construction: a 32-byte key, a random 24-byte
//! nonce per message, `nonce || ciphertext` wire format. We use the
//! RustCrypto `crypto_secretbox` crate (`XSalsa20Poly1305`), which speaks
//! the same construction.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_secretbox::{
   aead::{Aead, AeadCore, KeyInit},
   Nonce, XSalsa20Poly1305,
};
use rand::RngCore;

use crate::error::{PrivacyError, Result};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// A raw 32-byte secret key, as stored on disk in the key store.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl std::fmt::Debug for SecretKey {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str("SecretKey(..)")
   }
}

impl SecretKey {
   pub fn generate() -> Self {
      let mut bytes = [0u8; KEY_LEN];
      rand::rngs::OsRng.fill_bytes(&mut bytes);
      Self(bytes)
   }

   pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
      Self(bytes)
   }

   /// Decode a base64-encoded key as stored in `privacy/keys/current`.
   pub fn decode(s: &str) -> Result<Self> {
      let bytes = STANDARD
         .decode(s.trim())
         .map_err(|e| PrivacyError::Other(format!("malformed key: {e}")))?;
      let bytes: [u8; KEY_LEN] = bytes
         .try_into()
         .map_err(|_| PrivacyError::Other(format!("key must be {KEY_LEN} bytes")))?;
      Ok(Self(bytes))
   }

   /// Encode for storage in the key store.
   pub fn encode(&self) -> String {
      STANDARD.encode(self.0)
   }

   fn cipher(&self) -> XSalsa20Poly1305 {
      XSalsa20Poly1305::new_from_slice(&self.0).expect("key is exactly KEY_LEN bytes")
   }
}

/// Derive a key from a password, for the legacy `passwordsecretbox` path.
/// Parameters approximate libsodium's
/// `crypto_pwhash_scrypt_SALTBYTES` interactive preset
/// (`opslimit=2^19`, `memlimit=16MiB`), i.e. `log_n=14, r=8, p=1`.
pub fn derive_password_key(password: &str, salt: &[u8]) -> Result<SecretKey> {
   let params = scrypt::Params::new(14, 8, 1, KEY_LEN)
      .map_err(|e| PrivacyError::Other(format!("invalid scrypt parameters: {e}")))?;
   let mut out = [0u8; KEY_LEN];
   scrypt::scrypt(password.as_bytes(), salt, &params, &mut out)
      .map_err(|e| PrivacyError::Other(format!("scrypt key derivation failed: {e}")))?;
   Ok(SecretKey(out))
}

/// Encrypts with the single currently-active key.
pub struct Encryptor {
   key: SecretKey,
}

impl Encryptor {
   pub fn new(key: SecretKey) -> Self {
      Self { key }
   }

   /// Encrypt `plaintext`, returning `nonce || ciphertext` base64url
   /// (no padding), ready to embed in a commit message tag.
   pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
      let cipher = self.key.cipher();
      let nonce = XSalsa20Poly1305::generate_nonce(&mut crypto_secretbox::aead::OsRng);
      let ciphertext = cipher
         .encrypt(&nonce, plaintext)
         .map_err(|_| PrivacyError::Other("encryption failed".into()))?;
      let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
      wire.extend_from_slice(&nonce);
      wire.extend_from_slice(&ciphertext);
      Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(wire))
   }
}

/// Tries a set of candidate keys in order, returning the first successful
/// decryption: the active key, then each archived key in turn.
///
/// A closed sum type rather than `dyn Decryptor`: the set of ways we can
/// come by decryption material is fixed (one key, several keys, or a
/// password-derived legacy key), so there is no need for dynamic dispatch.
pub enum DecryptionProvider {
   SingleKey(SecretKey),
   MultiKey(Vec<SecretKey>),
   PasswordLegacy { salt: Vec<u8>, password: String },
}

impl DecryptionProvider {
   /// Decode `nonce || ciphertext` (base64url, no padding) and decrypt
   /// against each candidate key until one succeeds.
   pub fn decrypt(&self, wire_b64: &str) -> Result<Vec<u8>> {
      let wire = base64::engine::general_purpose::URL_SAFE_NO_PAD
         .decode(wire_b64.trim())
         .map_err(|e| PrivacyError::Other(format!("malformed ciphertext: {e}")))?;
      if wire.len() < NONCE_LEN {
         return Err(PrivacyError::Other("ciphertext too short".into()));
      }
      let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
      let nonce = Nonce::from_slice(nonce_bytes);

      for key in self.candidate_keys()? {
         if let Ok(plaintext) = key.cipher().decrypt(nonce, ciphertext) {
            return Ok(plaintext);
         }
      }
      Err(PrivacyError::Other("no key in the key store could decrypt this commit".into()))
   }

   fn candidate_keys(&self) -> Result<Vec<SecretKey>> {
      match self {
         Self::SingleKey(key) => Ok(vec![key.clone()]),
         Self::MultiKey(keys) => Ok(keys.clone()),
         Self::PasswordLegacy { salt, password } => {
            Ok(vec![derive_password_key(password, salt)?])
         },
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn round_trip_with_active_key() {
      let key = SecretKey::generate();
      let encryptor = Encryptor::new(key.clone());
      let decryptor = DecryptionProvider::SingleKey(key);

      let plaintext = b"1545144133 +0000";
      let wire = encryptor.encrypt(plaintext).unwrap();
      let recovered = decryptor.decrypt(&wire).unwrap();
      assert_eq!(recovered, plaintext);
   }

   #[test]
   fn multi_key_falls_back_to_archived_key() {
      let archived = SecretKey::generate();
      let current = SecretKey::generate();
      let encryptor = Encryptor::new(archived.clone());
      let decryptor = DecryptionProvider::MultiKey(vec![current, archived]);

      let plaintext = b"hello";
      let wire = encryptor.encrypt(plaintext).unwrap();
      assert_eq!(decryptor.decrypt(&wire).unwrap(), plaintext);
   }

   #[test]
   fn wrong_key_fails_to_decrypt() {
      let key_a = SecretKey::generate();
      let key_b = SecretKey::generate();
      let encryptor = Encryptor::new(key_a);
      let decryptor = DecryptionProvider::SingleKey(key_b);

      let wire = encryptor.encrypt(b"secret").unwrap();
      assert!(decryptor.decrypt(&wire).is_err());
   }

   #[test]
   fn key_encode_decode_round_trip() {
      let key = SecretKey::generate();
      let encoded = key.encode();
      let decoded = SecretKey::decode(&encoded).unwrap();
      assert!(key == decoded);
   }

   #[test]
   fn password_derived_key_is_deterministic() {
      let salt = b"0123456789abcdef";
      let key_a = derive_password_key("hunter2", salt).unwrap();
      let key_b = derive_password_key("hunter2", salt).unwrap();
      assert!(key_a == key_b);
   }

   #[test]
   fn password_legacy_round_trip() {
      let salt = b"0123456789abcdef".to_vec();
      let password = "hunter2".to_string();
      let key = derive_password_key(&password, &salt).unwrap();
      let encryptor = Encryptor::new(key);
      let decryptor = DecryptionProvider::PasswordLegacy { salt, password };

      let wire = encryptor.encrypt(b"legacy").unwrap();
      assert_eq!(decryptor.decrypt(&wire).unwrap(), b"legacy");
   }
}
