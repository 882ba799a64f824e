use crate::{digester, rc_err};
use alloc::boxed::Box;
use alloc::vec::Vec;
use rand::{rngs::StdRng, SeedableRng};
use rsa::{
    hazmat::{rsa_decrypt_and_check, rsa_encrypt},
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    traits::PublicKeyParts,
    BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey,
};
use sha2::digest::DynDigest;
use skm_common::{
    crypto,
    crypto::rsa::{CryptMode, SignMode, PKCS1_UNDIGESTED_SIGNATURE_PADDING_OVERHEAD},
    crypto::KeyMaterial,
    km_err, try_to_vec, vec_try, Error, FallibleAllocExt,
};
use skm_common::wire::{keymint::Digest, KeySizeInBits, RsaExponent};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// [`crypto::Rsa`] implementation based on the `rsa` crate.
pub struct RustCryptoRsa;

impl crypto::Rsa for RustCryptoRsa {
    fn generate_key(
        &self,
        rng: &mut dyn crypto::Rng,
        key_size: KeySizeInBits,
        pub_exponent: RsaExponent,
    ) -> Result<KeyMaterial, Error> {
        let mut gen_rng = seeded_rng(rng)?;
        let exponent = BigUint::from(pub_exponent.0);
        let key = RsaPrivateKey::new_with_exp(&mut gen_rng, key_size.0 as usize, &exponent)
            .map_err(rc_err!(InvalidArgument, "failed to generate RSA-{} key", key_size.0))?;
        let der = key
            .to_pkcs1_der()
            .map_err(rc_err!(UnknownError, "failed to encode RSA private key"))?;
        Ok(KeyMaterial::Rsa(crypto::rsa::Key(try_to_vec(der.as_bytes())?)))
    }

    fn begin_encrypt(
        &self,
        rng: &mut dyn crypto::Rng,
        key: crypto::rsa::Key,
        mode: CryptMode,
    ) -> Result<Box<dyn crypto::AccumulatingOperation + Send>, Error> {
        let key = private_key(&key)?;
        Ok(Box::new(RsaEncryptOperation {
            key: key.to_public_key(),
            mode,
            pending_input: Zeroizing::new(Vec::new()),
            rng: seeded_rng(rng)?,
        }))
    }

    fn begin_decrypt(
        &self,
        rng: &mut dyn crypto::Rng,
        key: crypto::rsa::Key,
        mode: CryptMode,
    ) -> Result<Box<dyn crypto::AccumulatingOperation + Send>, Error> {
        let key = private_key(&key)?;
        Ok(Box::new(RsaDecryptOperation {
            key,
            mode,
            pending_input: Zeroizing::new(Vec::new()),
            rng: seeded_rng(rng)?,
        }))
    }

    fn begin_sign(
        &self,
        rng: &mut dyn crypto::Rng,
        key: crypto::rsa::Key,
        mode: SignMode,
    ) -> Result<Box<dyn crypto::AccumulatingOperation + Send>, Error> {
        let key = private_key(&key)?;
        Ok(Box::new(RsaSignOperation {
            key,
            mode,
            data: SignData::new(mode.digest())?,
            rng: seeded_rng(rng)?,
        }))
    }

    fn begin_verify(
        &self,
        key: crypto::rsa::Key,
        mode: SignMode,
    ) -> Result<Box<dyn crypto::VerifyOperation + Send>, Error> {
        let key = private_key(&key)?;
        Ok(Box::new(RsaVerifyOperation {
            key: key.to_public_key(),
            mode,
            data: SignData::new(mode.digest())?,
        }))
    }
}

/// Build a generator for the `rsa` crate, seeded from the caller's RNG.
fn seeded_rng(rng: &mut dyn crypto::Rng) -> Result<StdRng, Error> {
    let mut seed = <StdRng as SeedableRng>::Seed::default();
    rng.fill_bytes(&mut seed)?;
    let seeded = StdRng::from_seed(seed);
    seed.zeroize();
    Ok(seeded)
}

/// Parse PKCS#1 key material.
fn private_key(key: &crypto::rsa::Key) -> Result<RsaPrivateKey, Error> {
    RsaPrivateKey::from_pkcs1_der(&key.0).map_err(rc_err!(InvalidKeyBlob, "bad RSA key material"))
}

/// Left-pad `data` with zeros to `len` bytes.
fn zero_pad_left(data: &[u8], len: usize) -> Result<Vec<u8>, Error> {
    if data.len() > len {
        return Err(km_err!(InvalidInputLength, "{} bytes do not fit in {}", data.len(), len));
    }
    let mut out = vec_try![0; len - data.len()]?;
    out.try_extend_from_slice(data)?;
    Ok(out)
}

/// PKCS#1 v1.5 signature scheme for a digest; [`Digest::None`] signs the raw data.
fn pkcs1_scheme(digest: Digest) -> Pkcs1v15Sign {
    match digest {
        Digest::None => Pkcs1v15Sign::new_unprefixed(),
        Digest::Md5 => Pkcs1v15Sign::new::<md5::Md5>(),
        Digest::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        Digest::Sha224 => Pkcs1v15Sign::new::<sha2::Sha224>(),
        Digest::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        Digest::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        Digest::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

/// PSS signature scheme for a digest, with a salt as long as the digest.
fn pss_scheme(digest: Digest) -> Result<Pss, Error> {
    Ok(match digest {
        Digest::Md5 => Pss::new::<md5::Md5>(),
        Digest::Sha1 => Pss::new::<sha1::Sha1>(),
        Digest::Sha224 => Pss::new::<sha2::Sha224>(),
        Digest::Sha256 => Pss::new::<sha2::Sha256>(),
        Digest::Sha384 => Pss::new::<sha2::Sha384>(),
        Digest::Sha512 => Pss::new::<sha2::Sha512>(),
        Digest::None => return Err(km_err!(IncompatiblePaddingMode, "PSS requires a digest")),
    })
}

/// OAEP padding with the given label digest; MGF1 always uses SHA-1.
fn oaep_scheme(digest: Digest) -> Result<Oaep, Error> {
    Ok(match digest {
        Digest::Md5 => Oaep::new_with_mgf_hash::<md5::Md5, sha1::Sha1>(),
        Digest::Sha1 => Oaep::new_with_mgf_hash::<sha1::Sha1, sha1::Sha1>(),
        Digest::Sha224 => Oaep::new_with_mgf_hash::<sha2::Sha224, sha1::Sha1>(),
        Digest::Sha256 => Oaep::new_with_mgf_hash::<sha2::Sha256, sha1::Sha1>(),
        Digest::Sha384 => Oaep::new_with_mgf_hash::<sha2::Sha384, sha1::Sha1>(),
        Digest::Sha512 => Oaep::new_with_mgf_hash::<sha2::Sha512, sha1::Sha1>(),
        Digest::None => return Err(km_err!(IncompatibleDigest, "OAEP requires a digest")),
    })
}

/// Accumulate at most one modulus worth of input.
fn accumulate(pending: &mut Vec<u8>, data: &[u8], max_size: usize) -> Result<(), Error> {
    if pending.len() + data.len() > max_size {
        return Err(km_err!(
            InvalidInputLength,
            "input of {} bytes exceeds {}-byte RSA key",
            pending.len() + data.len(),
            max_size
        ));
    }
    pending.try_extend_from_slice(data)?;
    Ok(())
}

/// RSA encryption operation, using only the public half of the key.
pub struct RsaEncryptOperation {
    key: RsaPublicKey,
    mode: CryptMode,
    pending_input: Zeroizing<Vec<u8>>,
    rng: StdRng,
}

impl crypto::AccumulatingOperation for RsaEncryptOperation {
    fn max_input_size(&self) -> Option<usize> {
        Some(self.key.size())
    }

    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        let max_size = self.key.size();
        accumulate(&mut self.pending_input, data, max_size)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        let Self { key, mode, pending_input, mut rng } = *self;
        let key_len = key.size();
        let data = &pending_input[..];
        match mode {
            CryptMode::NoPadding => {
                let m = BigUint::from_bytes_be(&zero_pad_left(data, key_len)?);
                if &m >= key.n() {
                    return Err(km_err!(InvalidArgument, "input too large for RSA modulus"));
                }
                let c = rsa_encrypt(&key, &m)
                    .map_err(rc_err!(UnknownError, "raw RSA encryption failed"))?;
                zero_pad_left(&c.to_bytes_be(), key_len)
            }
            CryptMode::Pkcs1_1_5Padding => key
                .encrypt(&mut rng, Pkcs1v15Encrypt, data)
                .map_err(rc_err!(InvalidInputLength, "PKCS#1 v1.5 encryption failed")),
            CryptMode::OaepPadding { msg_digest } => key
                .encrypt(&mut rng, oaep_scheme(msg_digest)?, data)
                .map_err(rc_err!(InvalidInputLength, "OAEP encryption failed")),
        }
    }
}

/// RSA decryption operation.
pub struct RsaDecryptOperation {
    key: RsaPrivateKey,
    mode: CryptMode,
    pending_input: Zeroizing<Vec<u8>>,
    rng: StdRng,
}

impl crypto::AccumulatingOperation for RsaDecryptOperation {
    fn max_input_size(&self) -> Option<usize> {
        Some(self.key.size())
    }

    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        let max_size = self.key.size();
        accumulate(&mut self.pending_input, data, max_size)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        let Self { key, mode, pending_input, mut rng } = *self;
        let key_len = key.size();
        let data = &pending_input[..];
        match mode {
            CryptMode::NoPadding => {
                let c = BigUint::from_bytes_be(data);
                if &c >= key.n() {
                    return Err(km_err!(InvalidArgument, "ciphertext too large for RSA modulus"));
                }
                let m = rsa_decrypt_and_check(&key, Some(&mut rng), &c)
                    .map_err(rc_err!(UnknownError, "raw RSA decryption failed"))?;
                zero_pad_left(&m.to_bytes_be(), key_len)
            }
            CryptMode::Pkcs1_1_5Padding => key
                .decrypt_blinded(&mut rng, Pkcs1v15Encrypt, data)
                .map_err(rc_err!(UnknownError, "PKCS#1 v1.5 decryption failed")),
            CryptMode::OaepPadding { msg_digest } => key
                .decrypt_blinded(&mut rng, oaep_scheme(msg_digest)?, data)
                .map_err(rc_err!(UnknownError, "OAEP decryption failed")),
        }
    }
}

/// Data accumulated for an RSA signature: either a running digest, or (for undigested modes)
/// the raw message.
enum SignData {
    Digested(Box<dyn DynDigest + Send>),
    Raw(Zeroizing<Vec<u8>>),
}

impl SignData {
    fn new(digest: Digest) -> Result<Self, Error> {
        Ok(match digester(digest) {
            Some(d) => SignData::Digested(d),
            None => SignData::Raw(Zeroizing::new(Vec::new())),
        })
    }

    fn update(&mut self, data: &[u8], max_raw_size: usize) -> Result<(), Error> {
        match self {
            SignData::Digested(d) => {
                d.update(data);
                Ok(())
            }
            SignData::Raw(pending) => accumulate(pending, data, max_raw_size),
        }
    }

    /// Return the digest, or the raw message for undigested modes.
    fn finish(self) -> Zeroizing<Vec<u8>> {
        match self {
            SignData::Digested(d) => Zeroizing::new(d.finalize().into_vec()),
            SignData::Raw(pending) => pending,
        }
    }
}

/// RSA signing operation.
pub struct RsaSignOperation {
    key: RsaPrivateKey,
    mode: SignMode,
    data: SignData,
    rng: StdRng,
}

impl crypto::AccumulatingOperation for RsaSignOperation {
    fn max_input_size(&self) -> Option<usize> {
        match self.data {
            SignData::Raw(_) => Some(self.key.size()),
            SignData::Digested(_) => None,
        }
    }

    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        let max_size = self.key.size();
        self.data.update(data, max_size)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        let Self { key, mode, data, mut rng } = *self;
        let key_len = key.size();
        let msg = data.finish();
        match mode {
            SignMode::NoPadding => {
                let m = BigUint::from_bytes_be(&zero_pad_left(&msg, key_len)?);
                if &m >= key.n() {
                    return Err(km_err!(InvalidArgument, "input too large for RSA modulus"));
                }
                let s = rsa_decrypt_and_check(&key, Some(&mut rng), &m)
                    .map_err(rc_err!(UnknownError, "raw RSA signature failed"))?;
                zero_pad_left(&s.to_bytes_be(), key_len)
            }
            SignMode::Pkcs1_1_5Padding(digest) => {
                if digest == Digest::None
                    && msg.len() + PKCS1_UNDIGESTED_SIGNATURE_PADDING_OVERHEAD > key_len
                {
                    return Err(km_err!(
                        InvalidInputLength,
                        "input of {} bytes too long for {}-byte key with PKCS#1 padding",
                        msg.len(),
                        key_len
                    ));
                }
                key.sign_with_rng(&mut rng, pkcs1_scheme(digest), &msg)
                    .map_err(rc_err!(UnknownError, "PKCS#1 v1.5 signature failed"))
            }
            SignMode::PssPadding(digest) => key
                .sign_with_rng(&mut rng, pss_scheme(digest)?, &msg)
                .map_err(rc_err!(UnknownError, "PSS signature failed")),
        }
    }
}

/// RSA verification operation, using only the public half of the key.
pub struct RsaVerifyOperation {
    key: RsaPublicKey,
    mode: SignMode,
    data: SignData,
}

impl crypto::VerifyOperation for RsaVerifyOperation {
    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        let max_size = self.key.size();
        self.data.update(data, max_size)
    }

    fn finish(self: Box<Self>, signature: &[u8]) -> Result<(), Error> {
        let key_len = self.key.size();
        let msg = self.data.finish();
        let verified = match self.mode {
            SignMode::NoPadding => {
                if signature.len() != key_len {
                    return Err(km_err!(
                        VerificationFailed,
                        "signature of {} bytes for {}-byte key",
                        signature.len(),
                        key_len
                    ));
                }
                let s = BigUint::from_bytes_be(signature);
                if &s >= self.key.n() {
                    return Err(km_err!(VerificationFailed, "signature exceeds RSA modulus"));
                }
                let m = rsa_encrypt(&self.key, &s)
                    .map_err(rc_err!(UnknownError, "raw RSA verification failed"))?;
                let recovered = zero_pad_left(&m.to_bytes_be(), key_len)?;
                let expected = zero_pad_left(&msg, key_len)?;
                bool::from(recovered.ct_eq(&expected))
            }
            SignMode::Pkcs1_1_5Padding(digest) => {
                self.key.verify(pkcs1_scheme(digest), &msg, signature).is_ok()
            }
            SignMode::PssPadding(digest) => {
                self.key.verify(pss_scheme(digest)?, &msg, signature).is_ok()
            }
        };
        if verified {
            Ok(())
        } else {
            Err(km_err!(VerificationFailed, "RSA signature did not verify"))
        }
    }
}
