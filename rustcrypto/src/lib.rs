//! Implementations of [`skm_common::crypto`] traits based on the pure-Rust RustCrypto crates.

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use skm_common::{crypto, Error};
use skm_common::wire::keymint::Digest;
use sha2::digest::DynDigest;

pub mod aes;
pub mod eq;
pub mod hmac;
pub mod rng;
pub mod rsa;
pub mod sha256;


/// Macro to emit a closure that builds an [`Error::Hal`] instance from a RustCrypto error,
/// together with a format-like message.
#[macro_export]
macro_rules! rc_err {
    { $error_code:ident, $($arg:tt)+ } => {
        |e| skm_common::Error::Hal(
            skm_common::wire::keymint::ErrorCode::$error_code,
            alloc::format!("{}:{}: {}: {:?}", file!(), line!(), format_args!($($arg)+), e)
        )
    };
}

/// Build a streaming hasher for a Keymaster [`Digest`]; `None` for [`Digest::None`].
pub(crate) fn digester(digest: Digest) -> Option<Box<dyn DynDigest + Send>> {
    match digest {
        Digest::None => None,
        Digest::Md5 => Some(Box::<md5::Md5>::default()),
        Digest::Sha1 => Some(Box::<sha1::Sha1>::default()),
        Digest::Sha224 => Some(Box::<sha2::Sha224>::default()),
        Digest::Sha256 => Some(Box::<sha2::Sha256>::default()),
        Digest::Sha384 => Some(Box::<sha2::Sha384>::default()),
        Digest::Sha512 => Some(Box::<sha2::Sha512>::default()),
    }
}

/// Assemble the full set of crypto trait implementations, with the RNG seeded from the
/// operating system.
pub fn implementation() -> Result<crypto::Implementation, Error> {
    Ok(crypto::Implementation {
        rng: Box::new(rng::RustCryptoRng::new()?),
        entropy: Box::new(rng::OsEntropy),
        compare: Box::new(eq::RustCryptoEq),
        aes: Box::new(aes::RustCryptoAes),
        hmac: Box::new(hmac::RustCryptoHmac),
        rsa: Box::new(rsa::RustCryptoRsa),
        sha256: Box::new(sha256::RustCryptoSha256),
    })
}
