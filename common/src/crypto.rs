//! Abstractions and related types for accessing cryptographic primitives
//! and related functionality.

use crate::{
    km_err, try_to_vec, vec_try,
    wire::keymint::{Algorithm, Digest},
    Error,
};
use alloc::vec::Vec;

pub mod aes;
pub mod hmac;
pub mod rsa;
mod traits;
pub use traits::*;

/// Size of SHA-256 output in bytes.
pub const SHA256_DIGEST_LEN: usize = 32;

/// Plaintext key material.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Aes(aes::Key),
    Hmac(hmac::Key),
    Rsa(rsa::Key),
}

impl KeyMaterial {
    /// Rebuild key material for `algorithm` from the raw form held inside a key blob.
    pub fn from_raw(algorithm: Algorithm, data: &[u8]) -> Result<Self, Error> {
        match algorithm {
            Algorithm::Aes => Ok(Self::Aes(aes::Key::new_from(data)?)),
            Algorithm::Hmac => Ok(Self::Hmac(hmac::Key::new_from(data)?)),
            Algorithm::Rsa => Ok(Self::Rsa(rsa::Key(try_to_vec(data)?))),
            Algorithm::Ec => Err(km_err!(UnsupportedAlgorithm, "EC keys not supported")),
        }
    }

    /// Raw form of the key material, as held inside a key blob: the secret bytes for a symmetric
    /// key, a PKCS#1 `RSAPrivateKey` DER encoding for an RSA key.
    pub fn raw(&self) -> &[u8] {
        match self {
            Self::Aes(k) => k.as_slice(),
            Self::Hmac(k) => &k.0,
            Self::Rsa(k) => &k.0,
        }
    }

    /// Algorithm the key material is for.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Aes(_) => Algorithm::Aes,
            Self::Hmac(_) => Algorithm::Hmac,
            Self::Rsa(_) => Algorithm::Rsa,
        }
    }

    /// Indicate whether the key material is for an asymmetric key.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Rsa(_))
    }

    /// Return the public key information as an ASN.1 DER encoded `SubjectPublicKeyInfo`, as
    /// described in RFC 5280 section 4.1.  Returns `None` for a symmetric key.
    pub fn subject_public_key_info(&self) -> Result<Option<Vec<u8>>, Error> {
        match self {
            Self::Rsa(key) => Ok(Some(key.subject_public_key_info_der()?)),
            Self::Aes(_) | Self::Hmac(_) => Ok(None),
        }
    }
}

/// Manual implementation of [`Debug`] that skips emitting plaintext key material.
impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Aes(k) => match k {
                aes::Key::Aes128(_) => f.write_str("Aes128(...)"),
                aes::Key::Aes192(_) => f.write_str("Aes192(...)"),
                aes::Key::Aes256(_) => f.write_str("Aes256(...)"),
            },
            Self::Hmac(_) => f.write_str("Hmac(...)"),
            Self::Rsa(_) => f.write_str("Rsa(...)"),
        }
    }
}

/// Direction of cipher operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymmetricOperation {
    Encrypt,
    Decrypt,
}

/// Extract or generate a nonce of the given size.
pub fn nonce(
    size: usize,
    caller_nonce: Option<&Vec<u8>>,
    rng: &mut dyn Rng,
) -> Result<Vec<u8>, Error> {
    match caller_nonce {
        Some(n) => match n.len() {
            l if l == size => Ok(try_to_vec(n)?),
            l => Err(km_err!(InvalidNonce, "want {} byte nonce, got {}", size, l)),
        },
        None => {
            let mut n = vec_try![0; size]?;
            rng.fill_bytes(&mut n)?;
            Ok(n)
        }
    }
}

/// Convenience wrapper to perform one-shot HMAC-SHA256.
pub fn hmac_sha256(hmac: &dyn Hmac, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut op = hmac.begin(hmac::Key::new_from(key)?, Digest::Sha256)?;
    op.update(data)?;
    op.finish()
}
