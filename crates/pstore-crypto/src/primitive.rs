//! Fixed-block asymmetric primitive
//!
//! `RsaPrimitive` is textbook RSA with no padding: sealing raises the block to
//! the private exponent, opening raises it to the public exponent. Inputs must
//! be exactly one modulus wide. The private operation is a plain modular
//! exponentiation without blinding.

use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::BigUint;
use std::sync::Arc;

use crate::error::CryptoError;
use crate::keys::KeyPair;

/// A deterministic permutation over blocks of a fixed width.
pub trait BlockPrimitive: Send + Sync {
    /// Width of every input and output block, in bytes
    fn block_bytes(&self) -> usize;

    /// "Private encrypt, no padding"
    fn seal_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// "Public decrypt, no padding"
    fn open_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

pub struct RsaPrimitive {
    key: Arc<KeyPair>,
    block_bytes: usize,
}

impl RsaPrimitive {
    pub fn new(key: Arc<KeyPair>) -> Self {
        let block_bytes = key.size_bytes();
        RsaPrimitive { key, block_bytes }
    }

    fn check_width(&self, block: &[u8]) -> Result<(), CryptoError> {
        if block.len() != self.block_bytes {
            return Err(CryptoError::Primitive(format!(
                "block is {} bytes, expected {}",
                block.len(),
                self.block_bytes
            )));
        }
        Ok(())
    }
}

impl BlockPrimitive for RsaPrimitive {
    fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    fn seal_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_width(block)?;
        let private = self
            .key
            .private_key()
            .ok_or_else(|| CryptoError::Key("sealing blocks requires a private key".into()))?;

        let m = BigUint::from_bytes_be(block);
        if &m >= private.n() {
            return Err(CryptoError::Primitive(
                "block value is not below the key modulus".into(),
            ));
        }
        let c = m.modpow(private.d(), private.n());
        left_pad(c.to_bytes_be(), self.block_bytes)
    }

    fn open_block(&self, block: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_width(block)?;
        let public = self.key.public_key();
        let c = BigUint::from_bytes_be(block);
        let m = c.modpow(public.e(), public.n());
        left_pad(m.to_bytes_be(), self.block_bytes)
    }
}

/// Big-endian integer bytes, left-padded with zeros to `width`.
fn left_pad(bytes: Vec<u8>, width: usize) -> Result<Vec<u8>, CryptoError> {
    if bytes.len() > width {
        return Err(CryptoError::Primitive(format!(
            "primitive output is {} bytes, wider than the {width}-byte block",
            bytes.len()
        )));
    }
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys;

    fn sample_block(width: usize) -> Vec<u8> {
        let mut block: Vec<u8> = (0..width).map(|i| (i * 31 + 7) as u8).collect();
        block[0] = 0;
        block
    }

    #[test]
    fn seal_then_open_is_identity() {
        let primitive = RsaPrimitive::new(test_keys::small());
        let block = sample_block(primitive.block_bytes());
        let sealed = primitive.seal_block(&block).unwrap();
        assert_eq!(sealed.len(), block.len());
        assert_ne!(sealed, block);
        assert_eq!(primitive.open_block(&sealed).unwrap(), block);
    }

    #[test]
    fn seal_is_deterministic() {
        let primitive = RsaPrimitive::new(test_keys::small());
        let block = sample_block(primitive.block_bytes());
        assert_eq!(
            primitive.seal_block(&block).unwrap(),
            primitive.seal_block(&block).unwrap()
        );
    }

    #[test]
    fn zero_block_keeps_width() {
        let primitive = RsaPrimitive::new(test_keys::small());
        let zero = vec![0u8; primitive.block_bytes()];
        let sealed = primitive.seal_block(&zero).unwrap();
        assert_eq!(sealed.len(), zero.len());
        assert_eq!(primitive.open_block(&sealed).unwrap(), zero);
    }

    #[test]
    fn wrong_width_rejected() {
        let primitive = RsaPrimitive::new(test_keys::small());
        assert!(primitive.seal_block(&[0u8; 10]).is_err());
        assert!(primitive.open_block(&[0u8; 10]).is_err());
    }

    #[test]
    fn block_above_modulus_rejected() {
        let primitive = RsaPrimitive::new(test_keys::small());
        let block = vec![0xFFu8; primitive.block_bytes()];
        let err = primitive.seal_block(&block).unwrap_err();
        assert!(err.to_string().contains("modulus"));
    }

    #[test]
    fn public_only_key_cannot_seal() {
        let key = test_keys::small();
        let public_only = Arc::new(KeyPair::from_public_key(key.public_key().clone()));
        let primitive = RsaPrimitive::new(public_only);
        let block = sample_block(primitive.block_bytes());
        assert!(matches!(
            primitive.seal_block(&block),
            Err(CryptoError::Key(_))
        ));

        let sealed = RsaPrimitive::new(key).seal_block(&block).unwrap();
        assert_eq!(primitive.open_block(&sealed).unwrap(), block);
    }
}
