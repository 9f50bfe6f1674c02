//! Versioned key indirection over the encryption primitive.

use super::cipher::{CryptoError, EnvelopeCipher};
use std::collections::HashMap;
use std::sync::RwLock;

/// Maps key ids to cipher instances and tracks the current write key.
///
/// Blobs are stored alongside the id of the key that produced them, so
/// decryption keeps working for every registered key while new writes go
/// through the current one. `re_encrypt` migrates a blob between keys
/// without exposing the plaintext to callers.
pub struct KeyRegistry {
    inner: RwLock<RegistryState>,
}

struct RegistryState {
    keys: HashMap<String, EnvelopeCipher>,
    current: String,
}

impl KeyRegistry {
    /// Creates a registry with a single initial key.
    pub fn new(key_id: impl Into<String>, cipher: EnvelopeCipher) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), cipher);
        Self {
            inner: RwLock::new(RegistryState {
                keys,
                current: key_id,
            }),
        }
    }

    /// Registers an additional key without changing the current one.
    pub fn add_key(&self, key_id: impl Into<String>, cipher: EnvelopeCipher) {
        let mut state = self.inner.write().expect("key registry lock poisoned");
        state.keys.insert(key_id.into(), cipher);
    }

    /// Makes `key_id` the current write key.
    pub fn set_current(&self, key_id: &str) -> Result<(), CryptoError> {
        let mut state = self.inner.write().expect("key registry lock poisoned");
        if !state.keys.contains_key(key_id) {
            return Err(CryptoError::UnknownKey(key_id.to_string()));
        }
        state.current = key_id.to_string();
        Ok(())
    }

    /// Returns the id of the current write key.
    pub fn current_key_id(&self) -> String {
        self.inner
            .read()
            .expect("key registry lock poisoned")
            .current
            .clone()
    }

    /// Returns the ids of all registered keys.
    pub fn key_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("key registry lock poisoned")
            .keys
            .keys()
            .cloned()
            .collect()
    }

    /// Encrypts under the current key, returning `(key_id, blob)`.
    pub fn encrypt_current(
        &self,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<(String, String), CryptoError> {
        let state = self.inner.read().expect("key registry lock poisoned");
        let cipher = state
            .keys
            .get(&state.current)
            .ok_or_else(|| CryptoError::UnknownKey(state.current.clone()))?;
        let blob = cipher.encrypt(plaintext, aad)?;
        Ok((state.current.clone(), blob))
    }

    /// Decrypts a blob produced under `key_id`.
    pub fn decrypt(
        &self,
        blob: &str,
        key_id: &str,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let state = self.inner.read().expect("key registry lock poisoned");
        let cipher = state
            .keys
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;
        cipher.decrypt(blob, aad)
    }

    /// Re-encrypts `blob` from `old_id` under `new_id` (current key when
    /// `None`), returning the new `(key_id, blob)` pair.
    pub fn re_encrypt(
        &self,
        blob: &str,
        old_id: &str,
        new_id: Option<&str>,
        aad: Option<&[u8]>,
    ) -> Result<(String, String), CryptoError> {
        let state = self.inner.read().expect("key registry lock poisoned");

        let old = state
            .keys
            .get(old_id)
            .ok_or_else(|| CryptoError::UnknownKey(old_id.to_string()))?;
        let new_id = new_id.unwrap_or(&state.current).to_string();
        let new = state
            .keys
            .get(&new_id)
            .ok_or_else(|| CryptoError::UnknownKey(new_id.clone()))?;

        let plaintext = old.decrypt(blob, aad)?;
        let new_blob = new.encrypt(&plaintext, aad)?;
        Ok((new_id, new_blob))
    }
}
