//! Binary encoding of an [`AuthorizationSet`].
//!
//! ```text
//! [0..4]          Count N of parameters, big-endian.
//! Then N entries, one after another:
//!   [0..4]        Tag number, big-endian.
//!   [4..8]        Length L of the value, big-endian.
//!   [8..8+L]      Value, laid out according to the tag's `TagType`:
//!                   4 bytes big-endian       (`Enum`, `EnumRep`, `Uint`, `UintRep`)
//!                   8 bytes big-endian       (`Ulong`, `UlongRep`, `Date`)
//!                   empty                    (`Bool`, only present when `true`)
//!                   raw bytes                (`Bytes`)
//! ```

use super::{blob_value, is_unique, AuthorizationSet};
use crate::{km_err, try_to_vec, vec_try_with_capacity, Error, FallibleAllocExt};
use alloc::vec::Vec;
use core::convert::{TryFrom, TryInto};
use skm_wire::{
    keymint::{tag_type, DateTime, KeyParam, Tag, TagType},
    KeySizeInBits, RsaExponent,
};

/// Most parameters accepted in a single encoded set.
pub const MAX_PARAM_COUNT: usize = 1024;

/// Longest byte-string value accepted in a single encoded parameter.
pub const MAX_PARAM_BLOB_LEN: usize = 64 * 1024;

/// Smallest possible encoding of one parameter (tag plus length).
const MIN_ENTRY_LEN: usize = 8;

/// Status of an encoded (or to-be-encoded) authorization set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetError {
    /// Lengths are inconsistent, a value is out of range, or a unique tag repeats.
    MalformedData,
    /// An embedded count or length implies an unreasonable allocation.
    AllocationFailure,
}

impl From<SetError> for Error {
    fn from(e: SetError) -> Self {
        match e {
            SetError::MalformedData => km_err!(InvalidKeyBlob, "malformed authorization set"),
            SetError::AllocationFailure => {
                km_err!(MemoryAllocationFailed, "authorization set exceeds size limits")
            }
        }
    }
}

/// Take `len` bytes from the front of `data`, never reading past its end.
fn take<'a>(data: &mut &'a [u8], len: usize) -> Result<&'a [u8], SetError> {
    if len > data.len() {
        return Err(SetError::MalformedData);
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

fn take_u32(data: &mut &[u8]) -> Result<u32, SetError> {
    let chunk: [u8; 4] = take(data, 4)?.try_into().map_err(|_e| SetError::MalformedData)?;
    Ok(u32::from_be_bytes(chunk))
}

fn u32_value(value: &[u8]) -> Result<u32, SetError> {
    let chunk: [u8; 4] = value.try_into().map_err(|_e| SetError::MalformedData)?;
    Ok(u32::from_be_bytes(chunk))
}

fn u64_value(value: &[u8]) -> Result<u64, SetError> {
    let chunk: [u8; 8] = value.try_into().map_err(|_e| SetError::MalformedData)?;
    Ok(u64::from_be_bytes(chunk))
}

fn enum_value<T: TryFrom<i32>>(value: &[u8]) -> Result<T, SetError> {
    T::try_from(u32_value(value)? as i32).map_err(|_e| SetError::MalformedData)
}

fn date_value(value: &[u8]) -> Result<DateTime, SetError> {
    Ok(DateTime { ms_since_epoch: u64_value(value)? as i64 })
}

fn bool_value(value: &[u8]) -> Result<(), SetError> {
    if value.is_empty() {
        Ok(())
    } else {
        Err(SetError::MalformedData)
    }
}

fn bytes_value(value: &[u8]) -> Result<Vec<u8>, SetError> {
    try_to_vec(value).map_err(|_e| SetError::AllocationFailure)
}

/// Build the typed parameter for `tag` from its encoded value.
fn decode_param(tag: Tag, value: &[u8]) -> Result<KeyParam, SetError> {
    Ok(match tag {
        Tag::Invalid => return Err(SetError::MalformedData),
        Tag::Purpose => KeyParam::Purpose(enum_value(value)?),
        Tag::Algorithm => KeyParam::Algorithm(enum_value(value)?),
        Tag::KeySize => KeyParam::KeySize(KeySizeInBits(u32_value(value)?)),
        Tag::BlockMode => KeyParam::BlockMode(enum_value(value)?),
        Tag::Digest => KeyParam::Digest(enum_value(value)?),
        Tag::Padding => KeyParam::Padding(enum_value(value)?),
        Tag::CallerNonce => bool_value(value).map(|_| KeyParam::CallerNonce)?,
        Tag::MinMacLength => KeyParam::MinMacLength(u32_value(value)?),
        Tag::EcCurve => KeyParam::EcCurve(enum_value(value)?),
        Tag::RsaPublicExponent => KeyParam::RsaPublicExponent(RsaExponent(u64_value(value)?)),
        Tag::IncludeUniqueId => bool_value(value).map(|_| KeyParam::IncludeUniqueId)?,
        Tag::BootloaderOnly => bool_value(value).map(|_| KeyParam::BootloaderOnly)?,
        Tag::ActiveDatetime => KeyParam::ActiveDatetime(date_value(value)?),
        Tag::OriginationExpireDatetime => KeyParam::OriginationExpireDatetime(date_value(value)?),
        Tag::UsageExpireDatetime => KeyParam::UsageExpireDatetime(date_value(value)?),
        Tag::MinSecondsBetweenOps => KeyParam::MinSecondsBetweenOps(u32_value(value)?),
        Tag::MaxUsesPerBoot => KeyParam::MaxUsesPerBoot(u32_value(value)?),
        Tag::UserId => KeyParam::UserId(u32_value(value)?),
        Tag::UserSecureId => KeyParam::UserSecureId(u64_value(value)?),
        Tag::NoAuthRequired => bool_value(value).map(|_| KeyParam::NoAuthRequired)?,
        Tag::UserAuthType => KeyParam::UserAuthType(u32_value(value)?),
        Tag::AuthTimeout => KeyParam::AuthTimeout(u32_value(value)?),
        Tag::AllowWhileOnBody => bool_value(value).map(|_| KeyParam::AllowWhileOnBody)?,
        Tag::AllApplications => bool_value(value).map(|_| KeyParam::AllApplications)?,
        Tag::ApplicationId => KeyParam::ApplicationId(bytes_value(value)?),
        Tag::ApplicationData => KeyParam::ApplicationData(bytes_value(value)?),
        Tag::CreationDatetime => KeyParam::CreationDatetime(date_value(value)?),
        Tag::Origin => KeyParam::Origin(enum_value(value)?),
        Tag::RootOfTrust => KeyParam::RootOfTrust(bytes_value(value)?),
        Tag::OsVersion => KeyParam::OsVersion(u32_value(value)?),
        Tag::OsPatchlevel => KeyParam::OsPatchlevel(u32_value(value)?),
        Tag::UniqueId => KeyParam::UniqueId(bytes_value(value)?),
        Tag::AttestationChallenge => KeyParam::AttestationChallenge(bytes_value(value)?),
        Tag::AttestationApplicationId => KeyParam::AttestationApplicationId(bytes_value(value)?),
        Tag::AttestationIdBrand => KeyParam::AttestationIdBrand(bytes_value(value)?),
        Tag::AttestationIdDevice => KeyParam::AttestationIdDevice(bytes_value(value)?),
        Tag::AttestationIdProduct => KeyParam::AttestationIdProduct(bytes_value(value)?),
        Tag::AttestationIdSerial => KeyParam::AttestationIdSerial(bytes_value(value)?),
        Tag::AttestationIdImei => KeyParam::AttestationIdImei(bytes_value(value)?),
        Tag::AttestationIdMeid => KeyParam::AttestationIdMeid(bytes_value(value)?),
        Tag::AttestationIdManufacturer => KeyParam::AttestationIdManufacturer(bytes_value(value)?),
        Tag::AttestationIdModel => KeyParam::AttestationIdModel(bytes_value(value)?),
        Tag::AssociatedData => KeyParam::AssociatedData(bytes_value(value)?),
        Tag::Nonce => KeyParam::Nonce(bytes_value(value)?),
        Tag::MacLength => KeyParam::MacLength(u32_value(value)?),
        Tag::ResetSinceIdRotation => bool_value(value).map(|_| KeyParam::ResetSinceIdRotation)?,
    })
}

/// Append the encoded value of `param` (without tag or length) to `out`.
fn encode_value(param: &KeyParam, out: &mut Vec<u8>) -> Result<(), Error> {
    match param {
        // Enum-holding variants.
        KeyParam::Purpose(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::Algorithm(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::BlockMode(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::Digest(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::Padding(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::EcCurve(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,
        KeyParam::Origin(v) => out.try_extend_from_slice(&(*v as u32).to_be_bytes())?,

        // `u32`-holding variants.
        KeyParam::KeySize(v) => out.try_extend_from_slice(&v.0.to_be_bytes())?,
        KeyParam::MinMacLength(v)
        | KeyParam::MinSecondsBetweenOps(v)
        | KeyParam::MaxUsesPerBoot(v)
        | KeyParam::UserId(v)
        | KeyParam::UserAuthType(v)
        | KeyParam::AuthTimeout(v)
        | KeyParam::OsVersion(v)
        | KeyParam::OsPatchlevel(v)
        | KeyParam::MacLength(v) => out.try_extend_from_slice(&v.to_be_bytes())?,

        // `u64`-holding variants.
        KeyParam::RsaPublicExponent(v) => out.try_extend_from_slice(&v.0.to_be_bytes())?,
        KeyParam::UserSecureId(v) => out.try_extend_from_slice(&v.to_be_bytes())?,

        // `DateTime`-holding variants.
        KeyParam::ActiveDatetime(v)
        | KeyParam::OriginationExpireDatetime(v)
        | KeyParam::UsageExpireDatetime(v)
        | KeyParam::CreationDatetime(v) => {
            out.try_extend_from_slice(&(v.ms_since_epoch as u64).to_be_bytes())?
        }

        // `true`-holding variants carry no value.
        KeyParam::CallerNonce
        | KeyParam::IncludeUniqueId
        | KeyParam::BootloaderOnly
        | KeyParam::NoAuthRequired
        | KeyParam::AllowWhileOnBody
        | KeyParam::AllApplications
        | KeyParam::ResetSinceIdRotation => {}

        // `Vec<u8>`-holding variants.
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
        | KeyParam::Nonce(v) => out.try_extend_from_slice(v)?,
    }
    Ok(())
}

/// Number of bytes that the value of `param` occupies once encoded.
fn value_len(param: &KeyParam) -> usize {
    match tag_type(param.tag()) {
        TagType::Bool => 0,
        TagType::Ulong | TagType::UlongRep | TagType::Date => 8,
        TagType::Bytes | TagType::Bignum => blob_value(param).map(|v| v.len()).unwrap_or(0),
        _ => 4,
    }
}

impl AuthorizationSet {
    /// Number of bytes that [`AuthorizationSet::serialize`] will produce.
    pub fn serialized_size(&self) -> usize {
        4 + self.0.iter().map(|p| MIN_ENTRY_LEN + value_len(p)).sum::<usize>()
    }

    /// Encode the set, preserving insertion order.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        if let Err(e) = self.is_valid() {
            return Err(km_err!(InvalidArgument, "cannot serialize invalid set: {:?}", e));
        }
        let mut result = vec_try_with_capacity!(self.serialized_size())?;
        self.serialize_into(&mut result)?;
        Ok(result)
    }

    /// Append the encoding of the set to `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        out.try_extend_from_slice(&(self.0.len() as u32).to_be_bytes())?;
        for param in &self.0 {
            out.try_extend_from_slice(&(param.tag() as u32).to_be_bytes())?;
            out.try_extend_from_slice(&(value_len(param) as u32).to_be_bytes())?;
            encode_value(param, out)?;
        }
        Ok(())
    }

    /// Decode a set that occupies the whole of `data`.
    pub fn deserialize(data: &[u8]) -> Result<AuthorizationSet, SetError> {
        let mut remaining = data;
        let set = Self::deserialize_prefix(&mut remaining)?;
        if !remaining.is_empty() {
            return Err(SetError::MalformedData);
        }
        Ok(set)
    }

    /// Decode a set from the front of `data`, advancing `data` past it.  Embedded lengths are
    /// never trusted beyond what remains in the buffer.
    pub fn deserialize_prefix(data: &mut &[u8]) -> Result<AuthorizationSet, SetError> {
        let count = take_u32(data)? as usize;
        if count > MAX_PARAM_COUNT {
            return Err(SetError::AllocationFailure);
        }
        if count > data.len() / MIN_ENTRY_LEN {
            return Err(SetError::MalformedData);
        }
        let mut params: Vec<KeyParam> =
            vec_try_with_capacity!(count).map_err(|_e| SetError::AllocationFailure)?;
        for _ in 0..count {
            let raw_tag = take_u32(data)?;
            let len = take_u32(data)? as usize;
            if len > MAX_PARAM_BLOB_LEN {
                return Err(SetError::AllocationFailure);
            }
            let value = take(data, len)?;
            let tag = Tag::try_from(raw_tag as i32).map_err(|_e| SetError::MalformedData)?;
            let param = decode_param(tag, value)?;
            if is_unique(tag) && params.iter().any(|p| p.tag() == tag) {
                return Err(SetError::MalformedData);
            }
            params.try_push(param).map_err(|_e| SetError::AllocationFailure)?;
        }
        Ok(AuthorizationSet(params))
    }
}
