//! RSA-OAEP(SHA-256) body encryption.
//!
//! OAEP caps the plaintext of one block at `k - 2*hLen - 2` bytes, where
//! `k` is the modulus size. Bodies are split into blocks of that size and
//! the ciphertext is the plain concatenation of `k`-byte blocks, so the
//! receiver can re-split without framing.

use crate::error::{Result, WireError};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

const SHA256_LEN: usize = 32;

fn max_block_plaintext(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(2 * SHA256_LEN + 2)
}

/// Agent-side half: encrypts outgoing bodies with the server's public key.
#[derive(Clone, Debug)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Loads a PEM public key (SPKI or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| WireError::BadKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block = max_block_plaintext(self.key.size());
        if block == 0 {
            return Err(WireError::BadKey("modulus too small for OAEP-SHA256".into()));
        }
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity((plaintext.len() / block + 1) * self.key.size());
        // An empty body still yields one block so the receiver sees ciphertext.
        if plaintext.is_empty() {
            out.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)?);
        }
        for chunk in plaintext.chunks(block) {
            out.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(out)
    }
}

/// Server-side half: decrypts incoming bodies with the private key.
#[derive(Clone, Debug)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Loads a PEM private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| WireError::BadKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let k = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % k != 0 {
            return Err(WireError::Crypto(rsa::Error::Decryption));
        }
        let mut out = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(k) {
            out.extend(self.key.decrypt(Oaep::new::<Sha256>(), block)?);
        }
        Ok(out)
    }
}
