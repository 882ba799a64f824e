//! Functionality related to HMAC signing/verification.

use crate::{get_tag_value, km_err, tag, try_to_vec, Error};
use alloc::vec::Vec;
use skm_wire::{
    keymint::{Digest, ErrorCode, KeyParam},
    KeySizeInBits,
};
use zeroize::ZeroizeOnDrop;

/// Minimum size of an HMAC key in bits.
pub const MIN_KEY_SIZE_BITS: usize = 64;

/// Maximum size of an HMAC key in bits.
pub const MAX_KEY_SIZE_BITS: usize = 512;

/// Shortest MAC that may be requested or verified, in bits.
pub const MIN_MAC_LENGTH_BITS: u32 = 64;

/// Digests that HMAC operations support.
pub const SUPPORTED_DIGESTS: &[Digest] =
    &[Digest::Md5, Digest::Sha1, Digest::Sha224, Digest::Sha256, Digest::Sha384, Digest::Sha512];

/// An HMAC key.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Key(pub Vec<u8>);

/// Check that the size of an HMAC key is within the allowed size for the Keymaster HAL.
pub fn valid_hal_size(key_size: KeySizeInBits) -> Result<(), Error> {
    if key_size.0 % 8 != 0 {
        Err(km_err!(UnsupportedKeySize, "key size {} bits not a multiple of 8", key_size.0))
    } else if !(MIN_KEY_SIZE_BITS..=MAX_KEY_SIZE_BITS).contains(&(key_size.0 as usize)) {
        Err(km_err!(UnsupportedKeySize, "unsupported KEY_SIZE {} bits for HMAC", key_size.0))
    } else {
        Ok(())
    }
}

impl Key {
    /// Create a new HMAC key from data.
    pub fn new(data: Vec<u8>) -> Key {
        Key(data)
    }

    /// Create a new HMAC key from data.
    pub fn new_from(data: &[u8]) -> Result<Key, Error> {
        Ok(Key::new(try_to_vec(data)?))
    }

    /// Indicate the size of the key in bits.
    pub fn size(&self) -> KeySizeInBits {
        KeySizeInBits((self.0.len() * 8) as u32)
    }
}

/// Parameters of an HMAC operation, resolved at begin time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode {
    /// Digest that the key is bound to.
    pub digest: Digest,
    /// Minimum MAC length in bits that the key allows.
    pub min_mac_len: u32,
    /// Requested MAC length in bits (signing only).
    pub mac_len: Option<u32>,
}

impl Mode {
    /// Determine the [`Mode`] for signing (`sign == true`) or verification with a key that has
    /// characteristics `chars`.  The key must hold exactly one digest; signing requires a
    /// `Tag::MAC_LENGTH` in `params`.
    pub fn new(chars: &[KeyParam], params: &[KeyParam], sign: bool) -> Result<Self, Error> {
        let digest = get_tag_value!(chars, Digest, ErrorCode::UnsupportedDigest)?;
        if digest == Digest::None {
            return Err(km_err!(UnsupportedDigest, "HMAC key with digest NONE"));
        }
        let min_mac_len = get_tag_value!(chars, MinMacLength, ErrorCode::InvalidKeyBlob)?;
        let mac_len = if sign {
            let mac_len = get_tag_value!(params, MacLength, ErrorCode::MissingMacLength)?;
            tag::check_hmac_mac_length(mac_len, min_mac_len, digest)?;
            Some(mac_len)
        } else {
            None
        };
        Ok(Mode { digest, min_mac_len, mac_len })
    }

    /// Check the length of a signature offered for verification.
    pub fn check_signature_len(&self, sig_len: usize) -> Result<(), Error> {
        let sig_bits = (sig_len * 8) as u32;
        if sig_bits > tag::digest_len(self.digest)? || sig_bits < MIN_MAC_LENGTH_BITS {
            return Err(km_err!(UnsupportedMacLength, "signature of {} bytes", sig_len));
        }
        if sig_bits < self.min_mac_len {
            return Err(km_err!(
                InvalidMacLength,
                "signature of {} bits below minimum {}",
                sig_bits,
                self.min_mac_len
            ));
        }
        Ok(())
    }
}
