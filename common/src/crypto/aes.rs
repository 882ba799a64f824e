//! Functionality related to AES encryption

use super::{nonce, Rng, SymmetricOperation};
use crate::{
    contains_tag_value, get_bool_tag_value, get_opt_tag_value, km_err, tag,
    wire::keymint::{BlockMode, KeyParam, PaddingMode},
    Error,
};
use alloc::vec::Vec;
use core::convert::TryInto;
use skm_wire::KeySizeInBits;
use zeroize::ZeroizeOnDrop;

/// Size of an AES block in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Size of AES-GCM nonce in bytes.
pub const GCM_NONCE_SIZE: usize = 12; // 96 bits

/// Block modes that AES operations support.
pub const SUPPORTED_BLOCK_MODES: &[BlockMode] =
    &[BlockMode::Ecb, BlockMode::Cbc, BlockMode::Ctr, BlockMode::Gcm];

/// Padding modes that AES operations support.
pub const SUPPORTED_PADDING_MODES: &[PaddingMode] = &[PaddingMode::None, PaddingMode::Pkcs7];

/// AES variant.
#[derive(Clone, Copy, Debug)]
pub enum Variant {
    Aes128,
    Aes192,
    Aes256,
}

impl Variant {
    /// Determine the variant for a key size, if it is one that AES supports.
    pub fn new(key_size: KeySizeInBits) -> Result<Self, Error> {
        match key_size.0 {
            128 => Ok(Variant::Aes128),
            192 => Ok(Variant::Aes192),
            256 => Ok(Variant::Aes256),
            _ => Err(km_err!(UnsupportedKeySize, "unsupported KEY_SIZE {} bits for AES", key_size.0)),
        }
    }
}

/// An AES-128, AES-192 or AES-256 key.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub enum Key {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl Key {
    /// Create a new [`Key`] from raw data, which must be 16, 24 or 32 bytes long.
    pub fn new_from(data: &[u8]) -> Result<Self, Error> {
        let bad_len = || km_err!(UnsupportedKeySize, "AES keys must be 16, 24 or 32 bytes");
        match data.len() {
            16 => Ok(Key::Aes128(data.try_into().map_err(|_e| bad_len())?)),
            24 => Ok(Key::Aes192(data.try_into().map_err(|_e| bad_len())?)),
            32 => Ok(Key::Aes256(data.try_into().map_err(|_e| bad_len())?)),
            l => Err(km_err!(UnsupportedKeySize, "AES keys must be 16, 24 or 32 bytes not {}", l)),
        }
    }

    /// Indicate the size of the key in bits.
    pub fn size(&self) -> KeySizeInBits {
        KeySizeInBits(match self {
            Key::Aes128(_) => 128,
            Key::Aes192(_) => 192,
            Key::Aes256(_) => 256,
        })
    }

    /// Raw key bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Key::Aes128(k) => &k[..],
            Key::Aes192(k) => &k[..],
            Key::Aes256(k) => &k[..],
        }
    }
}

/// Mode of AES plain cipher operation.  Associated value is the nonce.
#[derive(Clone, Copy, Debug)]
pub enum CipherMode {
    EcbNoPadding,
    EcbPkcs7Padding,
    CbcNoPadding { nonce: [u8; BLOCK_SIZE] },
    CbcPkcs7Padding { nonce: [u8; BLOCK_SIZE] },
    Ctr { nonce: [u8; BLOCK_SIZE] },
}

/// Mode of AES-GCM operation.  Associated value is the nonce.
#[derive(Clone, Copy, Debug)]
pub enum GcmMode {
    GcmTag12 { nonce: [u8; GCM_NONCE_SIZE] },
    GcmTag13 { nonce: [u8; GCM_NONCE_SIZE] },
    GcmTag14 { nonce: [u8; GCM_NONCE_SIZE] },
    GcmTag15 { nonce: [u8; GCM_NONCE_SIZE] },
    GcmTag16 { nonce: [u8; GCM_NONCE_SIZE] },
}

impl GcmMode {
    /// Build the mode for a tag length in bytes.
    pub fn new(nonce: [u8; GCM_NONCE_SIZE], tag_len: usize) -> Result<Self, Error> {
        match tag_len {
            12 => Ok(GcmMode::GcmTag12 { nonce }),
            13 => Ok(GcmMode::GcmTag13 { nonce }),
            14 => Ok(GcmMode::GcmTag14 { nonce }),
            15 => Ok(GcmMode::GcmTag15 { nonce }),
            16 => Ok(GcmMode::GcmTag16 { nonce }),
            v => Err(km_err!(UnsupportedMacLength, "want 12-16 byte tag for AES-GCM not {}", v)),
        }
    }

    /// Return the tag length (in bytes) for an AES-GCM mode.
    pub fn tag_len(&self) -> usize {
        match self {
            GcmMode::GcmTag12 { nonce: _ } => 12,
            GcmMode::GcmTag13 { nonce: _ } => 13,
            GcmMode::GcmTag14 { nonce: _ } => 14,
            GcmMode::GcmTag15 { nonce: _ } => 15,
            GcmMode::GcmTag16 { nonce: _ } => 16,
        }
    }

    /// Return the nonce for an AES-GCM mode.
    pub fn nonce(&self) -> &[u8; GCM_NONCE_SIZE] {
        match self {
            GcmMode::GcmTag12 { nonce }
            | GcmMode::GcmTag13 { nonce }
            | GcmMode::GcmTag14 { nonce }
            | GcmMode::GcmTag15 { nonce }
            | GcmMode::GcmTag16 { nonce } => nonce,
        }
    }
}

/// Mode of AES operation.
#[derive(Clone, Copy, Debug)]
pub enum Mode {
    Cipher(CipherMode),
    Aead(GcmMode),
}

impl Mode {
    /// Determine the [`Mode`] for an operation on a key with characteristics `chars`, rejecting
    /// invalid begin `params`.
    ///
    /// For encryption a caller-provided `Tag::NONCE` is only accepted if the key has
    /// `Tag::CALLER_NONCE`; otherwise a fresh nonce is generated with `rng`.  For decryption the
    /// nonce must be provided by the caller.  ECB mode has no nonce.
    pub fn new(
        chars: &[KeyParam],
        params: &[KeyParam],
        dir: SymmetricOperation,
        rng: &mut dyn Rng,
    ) -> Result<Self, Error> {
        let mode = tag::get_block_mode(params)?;
        if !SUPPORTED_BLOCK_MODES.contains(&mode) {
            return Err(km_err!(UnsupportedBlockMode, "block mode {:?} not supported", mode));
        }
        if !contains_tag_value!(chars, BlockMode, mode) {
            return Err(km_err!(
                IncompatibleBlockMode,
                "block mode {:?} not in key characteristics",
                mode
            ));
        }

        let tag_len = match mode {
            BlockMode::Gcm => Some(tag::check_gcm_mac_length(chars, params)?),
            _ => None,
        };

        let padding = tag::resolve_padding(chars, params, SUPPORTED_PADDING_MODES)?;
        if matches!(mode, BlockMode::Ctr | BlockMode::Gcm) && padding != PaddingMode::None {
            return Err(km_err!(
                IncompatiblePaddingMode,
                "padding {:?} not allowed for AES-{:?}",
                padding,
                mode
            ));
        }

        let nonce_size = match mode {
            BlockMode::Ecb => 0,
            BlockMode::Gcm => GCM_NONCE_SIZE,
            _ => BLOCK_SIZE,
        };
        let nonce = if nonce_size == 0 {
            Vec::new()
        } else {
            let caller_nonce = get_opt_tag_value!(params, Nonce)?;
            match dir {
                SymmetricOperation::Encrypt => {
                    if caller_nonce.is_some() && !get_bool_tag_value!(chars, CallerNonce)? {
                        return Err(km_err!(
                            CallerNonceProhibited,
                            "caller nonce provided for key without CALLER_NONCE"
                        ));
                    }
                    nonce(nonce_size, caller_nonce, rng)?
                }
                SymmetricOperation::Decrypt => match caller_nonce {
                    Some(n) => nonce(nonce_size, Some(n), rng)?,
                    None => {
                        return Err(km_err!(InvalidArgument, "no nonce provided for decryption"))
                    }
                },
            }
        };

        let block_nonce = || -> Result<[u8; BLOCK_SIZE], Error> {
            nonce.as_slice().try_into().map_err(|_e| {
                km_err!(InvalidNonce, "want {} byte nonce for AES-{:?}", BLOCK_SIZE, mode)
            })
        };
        Ok(match (mode, padding) {
            (BlockMode::Ecb, PaddingMode::Pkcs7) => Mode::Cipher(CipherMode::EcbPkcs7Padding),
            (BlockMode::Ecb, _) => Mode::Cipher(CipherMode::EcbNoPadding),
            (BlockMode::Cbc, PaddingMode::Pkcs7) => {
                Mode::Cipher(CipherMode::CbcPkcs7Padding { nonce: block_nonce()? })
            }
            (BlockMode::Cbc, _) => Mode::Cipher(CipherMode::CbcNoPadding { nonce: block_nonce()? }),
            (BlockMode::Ctr, _) => Mode::Cipher(CipherMode::Ctr { nonce: block_nonce()? }),
            (BlockMode::Gcm, _) => {
                let gcm_nonce: [u8; GCM_NONCE_SIZE] = nonce
                    .as_slice()
                    .try_into()
                    .map_err(|_e| km_err!(InvalidNonce, "want 12 byte nonce for AES-GCM"))?;
                let tag_len = tag_len.ok_or_else(|| {
                    km_err!(UnknownError, "no tag length resolved for AES-GCM")
                })?;
                Mode::Aead(GcmMode::new(gcm_nonce, tag_len)?)
            }
        })
    }

    /// Indicate whether the AES mode is an AEAD.
    pub fn is_aead(&self) -> bool {
        match self {
            Mode::Aead(_) => true,
            Mode::Cipher(_) => false,
        }
    }

    /// Return the nonce that the mode uses, if any.
    pub fn nonce(&self) -> Option<&[u8]> {
        match self {
            Mode::Cipher(CipherMode::EcbNoPadding) | Mode::Cipher(CipherMode::EcbPkcs7Padding) => {
                None
            }
            Mode::Cipher(CipherMode::CbcNoPadding { nonce })
            | Mode::Cipher(CipherMode::CbcPkcs7Padding { nonce })
            | Mode::Cipher(CipherMode::Ctr { nonce }) => Some(&nonce[..]),
            Mode::Aead(gcm) => Some(&gcm.nonce()[..]),
        }
    }
}
