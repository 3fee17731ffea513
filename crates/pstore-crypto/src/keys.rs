//! RSA key material for the block chain
//!
//! The chain inverts the usual roles: the private key seals blocks and the
//! public key opens them, so anyone holding the public key can read a node's
//! chunks but only the owner can produce them. A node that only reads needs
//! just the public half.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;

use crate::error::CryptoError;

pub struct KeyPair {
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
}

impl KeyPair {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        KeyPair {
            private: Some(private),
            public,
        }
    }

    /// A decrypt-only key pair.
    pub fn from_public_key(public: RsaPublicKey) -> Self {
        KeyPair {
            private: None,
            public,
        }
    }

    /// Parse PEM text (PKCS#8 or PKCS#1). At least one half must be given;
    /// when both are, they must belong together.
    pub fn from_pem(
        private_pem: Option<&str>,
        public_pem: Option<&str>,
    ) -> Result<Self, CryptoError> {
        let private = private_pem.map(parse_private).transpose()?;
        let public = public_pem.map(parse_public).transpose()?;

        match (private, public) {
            (Some(private), Some(public)) => {
                if RsaPublicKey::from(&private) != public {
                    return Err(CryptoError::Key(
                        "public key does not match private key".into(),
                    ));
                }
                Ok(KeyPair {
                    private: Some(private),
                    public,
                })
            }
            (Some(private), None) => Ok(KeyPair::from_private_key(private)),
            (None, Some(public)) => Ok(KeyPair::from_public_key(public)),
            (None, None) => Err(CryptoError::Key("no key material configured".into())),
        }
    }

    /// Load PEM key files.
    pub fn load(
        private_path: Option<&Path>,
        public_path: Option<&Path>,
    ) -> Result<Self, CryptoError> {
        let private_pem = private_path.map(read_pem).transpose()?;
        let public_pem = public_path.map(read_pem).transpose()?;
        KeyPair::from_pem(private_pem.as_deref(), public_pem.as_deref())
    }

    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        self.private.as_ref()
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn can_encrypt(&self) -> bool {
        self.private.is_some()
    }

    /// Modulus width in bytes
    pub fn size_bytes(&self) -> usize {
        self.public.size()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &self.private.as_ref().map(|_| "[REDACTED]"))
            .field("modulus_bytes", &self.size_bytes())
            .finish()
    }
}

fn read_pem(path: &Path) -> Result<String, CryptoError> {
    std::fs::read_to_string(path)
        .map_err(|e| CryptoError::Key(format!("reading key file {}: {e}", path.display())))
}

fn parse_private(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::Key(format!("parsing private key PEM: {e}")))
}

fn parse_public(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::Key(format!("parsing public key PEM: {e}")))
}
