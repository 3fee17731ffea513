//! pstore-crypto: the chained fixed-block cipher and its worker pool
//!
//! The asymmetric primitive only works on blocks of exactly the key width and
//! is deterministic, so applied block by block it leaks repeated plaintext
//! blocks like ECB. `chain` XORs every block with the previous ciphertext
//! block before sealing it (CBC-style, all-zero IV):
//!
//! ```text
//! plain block i ──► [0 pad | payload] ⊕ C(i-1) ──► RSA private op ──► C(i)
//! C(i) ──► RSA public op ──► ⊕ C(i-1) ──► drop pad ──► plain block i
//! ```
//!
//! `worker` runs whole-file transforms on a fixed pool so the async
//! pipelines never block on RSA arithmetic.

pub mod chain;
pub mod error;
pub mod keys;
pub mod primitive;
pub mod worker;

pub use chain::{decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, EncryptionContext};
pub use error::CryptoError;
pub use keys::KeyPair;
pub use primitive::{BlockPrimitive, RsaPrimitive};
pub use worker::{CryptoOutcome, CryptoPool, CryptoRequest, CryptoResponse, Operation};

#[cfg(test)]
pub(crate) mod test_keys {
    use crate::keys::KeyPair;
    use std::sync::{Arc, OnceLock};

    /// 512-bit key shared by tests that need many RSA operations.
    pub fn small() -> Arc<KeyPair> {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(|| generate(512)).clone()
    }

    /// 1024-bit key matching the default block size.
    pub fn standard() -> Arc<KeyPair> {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(|| generate(1024)).clone()
    }

    fn generate(bits: usize) -> Arc<KeyPair> {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits).unwrap();
        Arc::new(KeyPair::from_private_key(private))
    }
}
