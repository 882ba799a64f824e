//! Traits representing abstractions of cryptographic functionality.

use super::*;
use crate::{vec_try, Error};
use alloc::{boxed::Box, vec::Vec};
use skm_wire::{keymint, keymint::Digest, KeySizeInBits, RsaExponent};

/// Combined collection of trait implementations that must be provided.
pub struct Implementation {
    /// Random number generator.
    pub rng: Box<dyn Rng + Send>,

    /// Source of fresh entropy used to (re)seed `rng`.
    pub entropy: Box<dyn EntropySource + Send>,

    /// A constant-time equality implementation.
    pub compare: Box<dyn ConstTimeEq + Send + Sync>,

    /// AES implementation.
    pub aes: Box<dyn Aes + Send + Sync>,

    /// HMAC implementation.
    pub hmac: Box<dyn Hmac + Send + Sync>,

    /// RSA implementation.
    pub rsa: Box<dyn Rsa + Send + Sync>,

    /// SHA-256 implementation.
    pub sha256: Box<dyn Sha256 + Send + Sync>,
}

/// Abstraction of a random number generator that is cryptographically secure
/// and which accepts additional entropy to be mixed in.
pub trait Rng {
    /// Add entropy to the generator's pool.
    fn add_entropy(&mut self, data: &[u8]);
    /// Generate random data.
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error>;
    /// Return a random `u64` value.
    fn next_u64(&mut self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Abstraction of a hardware (or OS) source of entropy, used to seed an [`Rng`].
pub trait EntropySource {
    /// Fill `dest` with fresh entropy.
    fn fill_entropy(&mut self, dest: &mut [u8]) -> Result<(), Error>;
}

/// Abstraction of constant-time comparisons, for use in cryptographic contexts where timing attacks
/// need to be avoided.
pub trait ConstTimeEq {
    /// Indicate whether arguments are the same.
    fn eq(&self, left: &[u8], right: &[u8]) -> bool;
    /// Indicate whether arguments are the different.
    fn ne(&self, left: &[u8], right: &[u8]) -> bool {
        !self.eq(left, right)
    }
}

/// Abstraction of SHA-256.
pub trait Sha256 {
    /// Return the SHA-256 hash of the concatenation of `chunks`.
    fn hash_chunks(&self, chunks: &[&[u8]]) -> Result<[u8; SHA256_DIGEST_LEN], Error>;

    /// Return the SHA-256 hash of `data`.
    fn hash(&self, data: &[u8]) -> Result<[u8; SHA256_DIGEST_LEN], Error> {
        self.hash_chunks(&[data])
    }
}

/// Abstraction of AES functionality.
pub trait Aes {
    /// Generate an AES key.  The default implementation fills with random data.
    fn generate_key(&self, rng: &mut dyn Rng, variant: aes::Variant) -> Result<KeyMaterial, Error> {
        Ok(match variant {
            aes::Variant::Aes128 => {
                let mut key = [0; 16];
                rng.fill_bytes(&mut key[..])?;
                KeyMaterial::Aes(aes::Key::Aes128(key))
            }
            aes::Variant::Aes192 => {
                let mut key = [0; 24];
                rng.fill_bytes(&mut key[..])?;
                KeyMaterial::Aes(aes::Key::Aes192(key))
            }
            aes::Variant::Aes256 => {
                let mut key = [0; 32];
                rng.fill_bytes(&mut key[..])?;
                KeyMaterial::Aes(aes::Key::Aes256(key))
            }
        })
    }

    /// Import an AES key, also returning the key size in bits.
    fn import_key(&self, data: &[u8]) -> Result<(KeyMaterial, KeySizeInBits), Error> {
        let aes_key = aes::Key::new_from(data)?;
        let key_size = aes_key.size();
        Ok((KeyMaterial::Aes(aes_key), key_size))
    }

    /// Create an AES operation.  For block mode operations with no padding
    /// ([`aes::CipherMode::EcbNoPadding`] and [`aes::CipherMode::CbcNoPadding`]) the operation
    /// implementation should reject (with `ErrorCode::InvalidInputLength`) input data that does
    /// not end up being a multiple of the block size.
    fn begin(
        &self,
        key: aes::Key,
        mode: aes::CipherMode,
        dir: SymmetricOperation,
    ) -> Result<Box<dyn EmittingOperation + Send>, Error>;

    /// Create an AES-GCM operation.  When decrypting, the final `tag_len()` bytes of the input
    /// are the tag, and are never emitted as plaintext.
    fn begin_aead(
        &self,
        key: aes::Key,
        mode: aes::GcmMode,
        dir: SymmetricOperation,
    ) -> Result<Box<dyn AadOperation + Send>, Error>;
}

/// Abstraction of HMAC functionality.
pub trait Hmac {
    /// Generate an HMAC key.
    fn generate_key(
        &self,
        rng: &mut dyn Rng,
        key_size: KeySizeInBits,
    ) -> Result<KeyMaterial, Error> {
        hmac::valid_hal_size(key_size)?;

        let key_len = (key_size.0 / 8) as usize;
        let mut key = vec_try![0; key_len]?;
        rng.fill_bytes(&mut key)?;
        Ok(KeyMaterial::Hmac(hmac::Key::new(key)))
    }

    /// Import an HMAC key, also returning the key size in bits.
    fn import_key(&self, data: &[u8]) -> Result<(KeyMaterial, KeySizeInBits), Error> {
        let hmac_key = hmac::Key::new_from(data)?;
        let key_size = hmac_key.size();
        hmac::valid_hal_size(key_size)?;
        Ok((KeyMaterial::Hmac(hmac_key), key_size))
    }

    /// Create an HMAC operation. Implementations can assume that:
    /// - `key` will have length in range `8..=64` bytes.
    /// - `digest` will not be [`Digest::None`]
    fn begin(
        &self,
        key: hmac::Key,
        digest: Digest,
    ) -> Result<Box<dyn AccumulatingOperation + Send>, Error>;
}

/// Abstraction of RSA functionality.
pub trait Rsa {
    /// Generate an RSA key.
    fn generate_key(
        &self,
        rng: &mut dyn Rng,
        key_size: KeySizeInBits,
        pub_exponent: RsaExponent,
    ) -> Result<KeyMaterial, Error>;

    /// Import an RSA key in PKCS#8 format, also returning the key size in bits and public exponent.
    fn import_pkcs8_key(
        &self,
        data: &[u8],
        _params: &[keymint::KeyParam],
    ) -> Result<(KeyMaterial, KeySizeInBits, RsaExponent), Error> {
        rsa::import_pkcs8_key(data)
    }

    /// Create an RSA encryption operation.  The accumulated input is encrypted with the public
    /// half of `key` when the operation finishes.  Randomized padding, blinding and salts are
    /// drawn from a generator seeded by `rng` here and in the other private-key operations.
    fn begin_encrypt(
        &self,
        rng: &mut dyn Rng,
        key: rsa::Key,
        mode: rsa::CryptMode,
    ) -> Result<Box<dyn AccumulatingOperation + Send>, Error>;

    /// Create an RSA decryption operation.
    fn begin_decrypt(
        &self,
        rng: &mut dyn Rng,
        key: rsa::Key,
        mode: rsa::CryptMode,
    ) -> Result<Box<dyn AccumulatingOperation + Send>, Error>;

    /// Create an RSA signing operation.  For [`rsa::SignMode::Pkcs1_1_5Padding(Digest::None)`] the
    /// implementation should reject (with `ErrorCode::InvalidInputLength`) accumulated input that
    /// is larger than the size of the RSA key less overhead
    /// ([`rsa::PKCS1_UNDIGESTED_SIGNATURE_PADDING_OVERHEAD`]).
    fn begin_sign(
        &self,
        rng: &mut dyn Rng,
        key: rsa::Key,
        mode: rsa::SignMode,
    ) -> Result<Box<dyn AccumulatingOperation + Send>, Error>;

    /// Create an RSA verification operation.  The signature is checked when the operation
    /// finishes, failing with `ErrorCode::VerificationFailed` on mismatch.
    fn begin_verify(
        &self,
        key: rsa::Key,
        mode: rsa::SignMode,
    ) -> Result<Box<dyn VerifyOperation + Send>, Error>;
}

/// Abstraction of an in-progress operation that emits data as it progresses.
pub trait EmittingOperation {
    /// Update operation with data.
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Complete operation, consuming `self`.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error>;
}

/// Abstraction of an in-progress operation that has authenticated associated data.
pub trait AadOperation: EmittingOperation {
    /// Update additional data.  Fails with `ErrorCode::InvalidTag` once data has been passed to
    /// `update()`.
    fn update_aad(&mut self, aad: &[u8]) -> Result<(), Error>;
}

/// Abstraction of an in-progress operation that only emits data when it completes.
pub trait AccumulatingOperation {
    /// Maximum size of accumulated input.
    fn max_input_size(&self) -> Option<usize> {
        None
    }

    /// Update operation with data.
    fn update(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Complete operation, consuming `self`.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error>;
}

/// Abstraction of an in-progress verification operation.
pub trait VerifyOperation {
    /// Update operation with data.
    fn update(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Complete operation, consuming `self`, and check `signature` against the accumulated data.
    fn finish(self: Box<Self>, signature: &[u8]) -> Result<(), Error>;
}
