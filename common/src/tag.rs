//! Helper functionality for working with tags and authorization sets.

use crate::{km_err, try_to_vec, vec_try_with_capacity, Error, FallibleAllocExt};
use alloc::vec::Vec;
use core::ops::Deref;
use skm_wire::{
    keymint::{
        tag_type, Algorithm, BlockMode, Digest, ErrorCode, KeyParam, KeyPurpose, PaddingMode, Tag,
        TagType,
    },
    KeySizeInBits, RsaExponent,
};

mod serialize;
pub use serialize::*;

/// Macro to retrieve a copy of the (single) value of a tag in a collection of `KeyParam`s.  There
/// can be only one.  Only works for variants whose data type implements `Copy`.
#[macro_export]
macro_rules! get_tag_value {
    { $params:expr, $variant:ident, $err:expr } => {
        {
            let mut result = None;
            let mut count = 0;
            for param in $params {
                if let $crate::wire::keymint::KeyParam::$variant(v) = param {
                    count += 1;
                    result = Some(*v);
                }
            }
            match (count, result) {
                (1, Some(v)) => Ok(v),
                (0, _) => Err($crate::km_verr!($err, "missing tag {}", stringify!($variant))),
                _ => Err($crate::km_verr!($err, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to retrieve the value of an optional single-valued tag in a collection of `KeyParam`s.  It
/// may or may not be present, but multiple instances of the tag are assumed to be invalid.
#[macro_export]
macro_rules! get_opt_tag_value {
    { $params:expr, $variant:ident } => {
        $crate::get_opt_tag_value!($params, $variant, InvalidTag)
    };
    { $params:expr, $variant:ident, $dup_error:ident } => {
        {
            let mut result = None;
            let mut count = 0;
            for param in $params {
                if let $crate::wire::keymint::KeyParam::$variant(v) = param {
                    count += 1;
                    result = Some(v);
                }
            }
            match count {
                0 | 1 => Ok(result),
                _ => Err($crate::km_err!($dup_error, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to retrieve a `bool` tag value, returning `false` if the tag is absent
#[macro_export]
macro_rules! get_bool_tag_value {
    { $params:expr, $variant:ident } => {
        {
            let mut count = 0;
            for param in $params {
                if let $crate::wire::keymint::KeyParam::$variant = param {
                    count += 1;
                }
            }
            match count {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err($crate::km_err!(InvalidTag, "duplicate tag {}", stringify!($variant))),
            }
        }
    }
}

/// Macro to check a collection of `KeyParam`s holds a value matching the given value.
#[macro_export]
macro_rules! contains_tag_value {
    { $params:expr, $variant:ident, $value:expr } => {
        {
            let mut found = false;
            for param in $params {
                if let $crate::wire::keymint::KeyParam::$variant(v) = param {
                    if *v == $value {
                        found = true;
                    }
                }
            }
            found
        }
    }
}

/// Indicate whether a tag may only appear once in an [`AuthorizationSet`].
pub fn is_unique(tag: Tag) -> bool {
    !matches!(tag_type(tag), TagType::EnumRep | TagType::UintRep | TagType::UlongRep)
}

/// Ordered collection of key parameters, in which non-repeatable tags occur at most once.
///
/// Insertion order is preserved so that serialization is deterministic; equality ignores order.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationSet(Vec<KeyParam>);

impl AuthorizationSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a set from a list of parameters, rejecting repeats of unique tags.
    pub fn from_params(params: &[KeyParam]) -> Result<Self, Error> {
        let mut set = Self(vec_try_with_capacity!(params.len())?);
        for param in params {
            set.push(param.clone())?;
        }
        Ok(set)
    }

    /// Append a parameter. Fails with `InvalidTag` if the tag is unique and already present.
    pub fn push(&mut self, param: KeyParam) -> Result<(), Error> {
        let tag = param.tag();
        if tag == Tag::Invalid {
            return Err(km_err!(InvalidTag, "cannot add invalid tag"));
        }
        if is_unique(tag) && self.contains_tag(tag) {
            return Err(km_err!(InvalidTag, "duplicate value for unique tag {:?}", tag));
        }
        self.0.try_push(param)?;
        Ok(())
    }

    /// Append every parameter from `other`.
    pub fn extend(&mut self, other: &[KeyParam]) -> Result<(), Error> {
        for param in other {
            self.push(param.clone())?;
        }
        Ok(())
    }

    /// Return the first parameter with the given tag.
    pub fn get(&self, tag: Tag) -> Option<&KeyParam> {
        self.0.iter().find(|p| p.tag() == tag)
    }

    /// Return every parameter with the given tag, in insertion order.
    pub fn get_all(&self, tag: Tag) -> impl Iterator<Item = &KeyParam> {
        self.0.iter().filter(move |p| p.tag() == tag)
    }

    /// Indicate whether the exact parameter (tag and value) is present.
    pub fn contains(&self, param: &KeyParam) -> bool {
        self.0.iter().any(|p| p == param)
    }

    /// Indicate whether any parameter with the given tag is present.
    pub fn contains_tag(&self, tag: Tag) -> bool {
        self.0.iter().any(|p| p.tag() == tag)
    }

    /// Remove every parameter with the given tag.
    pub fn remove_all(&mut self, tag: Tag) {
        self.0.retain(|p| p.tag() != tag)
    }

    /// Borrow the parameters in insertion order.
    pub fn params(&self) -> &[KeyParam] {
        &self.0
    }

    /// Consume the set, returning its parameters in insertion order.
    pub fn into_vec(self) -> Vec<KeyParam> {
        self.0
    }

    /// Check that the set could be serialized and read back: no unique tag repeats
    /// (`MalformedData`) and no count or length beyond the decoder limits (`AllocationFailure`).
    pub fn is_valid(&self) -> Result<(), SetError> {
        if self.0.len() > MAX_PARAM_COUNT {
            return Err(SetError::AllocationFailure);
        }
        for (idx, param) in self.0.iter().enumerate() {
            let tag = param.tag();
            if is_unique(tag) && self.0[..idx].iter().any(|p| p.tag() == tag) {
                return Err(SetError::MalformedData);
            }
            if let Some(data) = blob_value(param) {
                if data.len() > MAX_PARAM_BLOB_LEN {
                    return Err(SetError::AllocationFailure);
                }
            }
        }
        Ok(())
    }
}

impl Deref for AuthorizationSet {
    type Target = [KeyParam];
    fn deref(&self) -> &[KeyParam] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a AuthorizationSet {
    type Item = &'a KeyParam;
    type IntoIter = core::slice::Iter<'a, KeyParam>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl PartialEq for AuthorizationSet {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        // Multiset comparison: every parameter occurs equally often in both sets.
        self.0.iter().all(|p| {
            let mine = self.0.iter().filter(|q| *q == p).count();
            let theirs = other.0.iter().filter(|q| *q == p).count();
            mine == theirs
        })
    }
}

impl Eq for AuthorizationSet {}

/// Return the byte-string payload of a parameter, if it has one.
pub(crate) fn blob_value(param: &KeyParam) -> Option<&[u8]> {
    match param {
        KeyParam::ApplicationId(v)
        | KeyParam::ApplicationData(v)
        | KeyParam::RootOfTrust(v)
        | KeyParam::UniqueId(v)
        | KeyParam::AttestationChallenge(v)
        | KeyParam::AttestationApplicationId(v)
        | KeyParam::AttestationIdBrand(v)
        | KeyParam::AttestationIdDevice(v)
        | KeyParam::AttestationIdProduct(v)
        | KeyParam::AttestationIdSerial(v)
        | KeyParam::AttestationIdImei(v)
        | KeyParam::AttestationIdMeid(v)
        | KeyParam::AttestationIdManufacturer(v)
        | KeyParam::AttestationIdModel(v)
        | KeyParam::AssociatedData(v)
        | KeyParam::Nonce(v) => Some(v),
        _ => None,
    }
}

/// Get the configured algorithm from a set of parameters.
pub fn get_algorithm(params: &[KeyParam]) -> Result<Algorithm, Error> {
    get_tag_value!(params, Algorithm, ErrorCode::UnsupportedAlgorithm)
}

/// Get the configured block mode from a set of parameters.
pub fn get_block_mode(params: &[KeyParam]) -> Result<BlockMode, Error> {
    get_tag_value!(params, BlockMode, ErrorCode::UnsupportedBlockMode)
}

/// Get the configured padding mode from a set of parameters.
pub fn get_padding_mode(params: &[KeyParam]) -> Result<PaddingMode, Error> {
    get_tag_value!(params, Padding, ErrorCode::UnsupportedPaddingMode)
}

/// Get the configured digest from a set of parameters.
pub fn get_digest(params: &[KeyParam]) -> Result<Digest, Error> {
    get_tag_value!(params, Digest, ErrorCode::UnsupportedDigest)
}

/// Build the parameters that are used as the hidden input to key blob protection:
/// - `ApplicationId(data)` if present
/// - `ApplicationData(data)` if present
/// - `RootOfTrust(rot)` where `rot` is the fixed root-of-trust marker
pub fn hidden(params: &[KeyParam], rot: &[u8]) -> Result<AuthorizationSet, Error> {
    let mut results = AuthorizationSet(vec_try_with_capacity!(3)?);
    if let Some(app_id) = get_opt_tag_value!(params, ApplicationId)? {
        results.push(KeyParam::ApplicationId(try_to_vec(app_id)?))?;
    }
    if let Some(app_data) = get_opt_tag_value!(params, ApplicationData)? {
        results.push(KeyParam::ApplicationData(try_to_vec(app_data)?))?;
    }
    results.push(KeyParam::RootOfTrust(try_to_vec(rot)?))?;
    Ok(results)
}

/// Check the parameter validity for an AES key that is about to be generated or imported.
pub fn check_aes_params(params: &[KeyParam]) -> Result<(), Error> {
    let gcm_support = params.iter().any(|p| *p == KeyParam::BlockMode(BlockMode::Gcm));
    if gcm_support {
        let min_mac_len = get_tag_value!(params, MinMacLength, ErrorCode::MissingMinMacLength)?;
        if (min_mac_len % 8 != 0) || !(96..=128).contains(&min_mac_len) {
            return Err(km_err!(
                UnsupportedMinMacLength,
                "unsupported MIN_MAC_LENGTH {} bits",
                min_mac_len
            ));
        }
    }
    Ok(())
}

/// Check the parameter validity for an HMAC key that is about to be generated or imported.
pub fn check_hmac_params(params: &[KeyParam], key_size: KeySizeInBits) -> Result<(), Error> {
    crate::crypto::hmac::valid_hal_size(key_size)?;
    let digest = get_tag_value!(params, Digest, ErrorCode::UnsupportedDigest)?;
    if digest == Digest::None {
        return Err(km_err!(UnsupportedDigest, "unsupported digest {:?}", digest));
    }

    let min_mac_len = get_tag_value!(params, MinMacLength, ErrorCode::MissingMinMacLength)?;
    if (min_mac_len % 8 != 0) || min_mac_len < 64 || min_mac_len > digest_len(digest)? {
        return Err(km_err!(
            UnsupportedMinMacLength,
            "unsupported MIN_MAC_LENGTH {:?} bits for {:?}",
            min_mac_len,
            digest
        ));
    }
    Ok(())
}

/// Check the size and public exponent of an RSA key that is about to be generated or imported.
pub fn check_rsa_params(key_size: KeySizeInBits, exponent: RsaExponent) -> Result<(), Error> {
    if !(16..=4096).contains(&key_size.0) {
        return Err(km_err!(UnsupportedKeySize, "unsupported KEY_SIZE {:?} bits for RSA", key_size));
    }
    if exponent.0 < 3 || exponent.0 % 2 == 0 {
        return Err(km_err!(InvalidArgument, "invalid RSA public exponent {}", exponent.0));
    }
    Ok(())
}

/// Check or populate a `Tag::KEY_SIZE` value.
pub fn require_matching_key_size(
    params: &[KeyParam],
    key_size: KeySizeInBits,
) -> Result<Vec<KeyParam>, Error> {
    let mut deduced_chars = Vec::new();
    match get_opt_tag_value!(params, KeySize)? {
        Some(param_key_size) => {
            if *param_key_size != key_size {
                return Err(km_err!(
                    ImportParameterMismatch,
                    "specified KEY_SIZE {:?} bits != actual key size {:?}",
                    param_key_size,
                    key_size
                ));
            }
        }
        None => deduced_chars.try_push(KeyParam::KeySize(key_size))?,
    }
    Ok(deduced_chars)
}

/// Indicate whether an algorithm can perform an operation with the given purpose at all.
pub fn purpose_supported(algo: Algorithm, purpose: KeyPurpose) -> bool {
    matches!(
        (algo, purpose),
        (Algorithm::Aes, KeyPurpose::Encrypt)
            | (Algorithm::Aes, KeyPurpose::Decrypt)
            | (Algorithm::Hmac, KeyPurpose::Sign)
            | (Algorithm::Hmac, KeyPurpose::Verify)
            | (Algorithm::Rsa, KeyPurpose::Sign)
            | (Algorithm::Rsa, KeyPurpose::Verify)
            | (Algorithm::Rsa, KeyPurpose::Encrypt)
            | (Algorithm::Rsa, KeyPurpose::Decrypt)
    )
}

/// Indicate whether an operation only needs the public half of an asymmetric key.
pub fn is_public_key_operation(algo: Algorithm, purpose: KeyPurpose) -> bool {
    matches!(algo, Algorithm::Rsa | Algorithm::Ec)
        && matches!(purpose, KeyPurpose::Encrypt | KeyPurpose::Verify)
}

/// Resolve the padding mode for an operation: it must be given exactly once in `params`, and the
/// key in `chars` must authorize it.
pub fn resolve_padding(
    chars: &[KeyParam],
    params: &[KeyParam],
    supported: &[PaddingMode],
) -> Result<PaddingMode, Error> {
    let padding = get_padding_mode(params)?;
    if !supported.contains(&padding) {
        return Err(km_err!(UnsupportedPaddingMode, "padding {:?} not supported", padding));
    }
    if !contains_tag_value!(chars, Padding, padding) {
        return Err(km_err!(
            IncompatiblePaddingMode,
            "padding mode {:?} not in key characteristics",
            padding
        ));
    }
    Ok(padding)
}

/// Resolve the digest for an operation. If `params` holds none, `Digest::None` is used provided
/// the key authorizes it; otherwise the requested digest must be authorized by the key.
pub fn resolve_digest(chars: &[KeyParam], params: &[KeyParam]) -> Result<Digest, Error> {
    match get_opt_tag_value!(params, Digest, UnsupportedDigest)? {
        None => {
            if contains_tag_value!(chars, Digest, Digest::None) {
                Ok(Digest::None)
            } else {
                Err(km_err!(UnsupportedDigest, "no digest specified"))
            }
        }
        Some(digest) => {
            if !contains_tag_value!(chars, Digest, *digest) {
                return Err(km_err!(
                    IncompatibleDigest,
                    "digest {:?} not in key characteristics",
                    digest
                ));
            }
            Ok(*digest)
        }
    }
}

/// Check the `MAC_LENGTH` of an AES-GCM operation against the key's `MIN_MAC_LENGTH`, returning
/// the tag length in bytes.
pub fn check_gcm_mac_length(chars: &[KeyParam], params: &[KeyParam]) -> Result<usize, Error> {
    let mac_len = get_tag_value!(params, MacLength, ErrorCode::MissingMacLength)?;
    let min_mac_len = get_tag_value!(chars, MinMacLength, ErrorCode::InvalidKeyBlob)?;
    if mac_len % 8 != 0 || !(96..=128).contains(&mac_len) {
        return Err(km_err!(UnsupportedMacLength, "invalid mac len {}", mac_len));
    }
    if mac_len < min_mac_len {
        return Err(km_err!(InvalidMacLength, "mac len {} less than min {}", mac_len, min_mac_len));
    }
    Ok((mac_len / 8) as usize)
}

/// Check a MAC length in bits for an HMAC operation: it must be a whole number of bytes no longer
/// than the digest (`UnsupportedMacLength`) and no shorter than the key's minimum
/// (`InvalidMacLength`).
pub fn check_hmac_mac_length(mac_len: u32, min_mac_len: u32, digest: Digest) -> Result<(), Error> {
    if mac_len % 8 != 0 || mac_len < 64 || mac_len > digest_len(digest)? {
        return Err(km_err!(UnsupportedMacLength, "invalid mac len {}", mac_len));
    }
    if mac_len < min_mac_len {
        return Err(km_err!(InvalidMacLength, "mac len {} less than min {}", mac_len, min_mac_len));
    }
    Ok(())
}

/// Return the length in bits of a [`Digest`] function.
pub fn digest_len(digest: Digest) -> Result<u32, Error> {
    match digest {
        Digest::Md5 => Ok(128),
        Digest::Sha1 => Ok(160),
        Digest::Sha224 => Ok(224),
        Digest::Sha256 => Ok(256),
        Digest::Sha384 => Ok(384),
        Digest::Sha512 => Ok(512),
        _ => Err(km_err!(IncompatibleDigest, "invalid digest {:?}", digest)),
    }
}
