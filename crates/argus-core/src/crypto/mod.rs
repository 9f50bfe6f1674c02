//! Authenticated encryption for sensitive data at rest.
//!
//! The [`EnvelopeCipher`] encrypts opaque payloads with AES-256-GCM; the
//! [`KeyRegistry`] adds versioned multi-key indirection on top so stored
//! blobs can be re-encrypted under a newer key without a flag day.

mod cipher;
mod registry;

pub use cipher::{generate_salt, CryptoError, EnvelopeCipher, PBKDF2_MIN_ITERATIONS};
pub use registry::KeyRegistry;
