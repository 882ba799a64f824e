use crate::rc_err;
use alloc::boxed::Box;
use alloc::vec::Vec;
use hmac::{Hmac, Mac};
use skm_common::{crypto, km_err, try_to_vec, Error};
use skm_common::wire::keymint::Digest;

/// [`crypto::Hmac`] implementation based on the `hmac` crate.
pub struct RustCryptoHmac;

impl crypto::Hmac for RustCryptoHmac {
    fn begin(
        &self,
        key: crypto::hmac::Key,
        digest: Digest,
    ) -> Result<Box<dyn crypto::AccumulatingOperation + Send>, Error> {
        let k = &key.0[..];
        let state = match digest {
            Digest::Md5 => HmacState::Md5(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::Sha1 => HmacState::Sha1(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::Sha224 => HmacState::Sha224(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::Sha256 => HmacState::Sha256(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::Sha384 => HmacState::Sha384(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::Sha512 => HmacState::Sha512(
                Hmac::new_from_slice(k).map_err(rc_err!(InvalidArgument, "bad HMAC key"))?,
            ),
            Digest::None => {
                return Err(km_err!(UnsupportedDigest, "HMAC requires a digest"));
            }
        };
        Ok(Box::new(RustCryptoHmacOperation { state }))
    }
}

enum HmacState {
    Md5(Hmac<md5::Md5>),
    Sha1(Hmac<sha1::Sha1>),
    Sha224(Hmac<sha2::Sha224>),
    Sha256(Hmac<sha2::Sha256>),
    Sha384(Hmac<sha2::Sha384>),
    Sha512(Hmac<sha2::Sha512>),
}

/// [`crypto::AccumulatingOperation`] for HMAC.  The MAC is computed incrementally, so nothing
/// beyond the hash state is buffered.
pub struct RustCryptoHmacOperation {
    state: HmacState,
}

impl crypto::AccumulatingOperation for RustCryptoHmacOperation {
    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.state {
            HmacState::Md5(m) => m.update(data),
            HmacState::Sha1(m) => m.update(data),
            HmacState::Sha224(m) => m.update(data),
            HmacState::Sha256(m) => m.update(data),
            HmacState::Sha384(m) => m.update(data),
            HmacState::Sha512(m) => m.update(data),
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        match self.state {
            HmacState::Md5(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
            HmacState::Sha1(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
            HmacState::Sha224(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
            HmacState::Sha256(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
            HmacState::Sha384(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
            HmacState::Sha512(m) => Ok(try_to_vec(&m.finalize().into_bytes())?),
        }
    }
}
