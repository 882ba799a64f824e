//! Key blob manipulation functionality.
//!
//! Two layouts are supported, distinguished by their first (version) byte:
//!
//! ```text
//! Auth-encrypted (version 0):
//!   version:u8 | hw_enforced:AuthSet | sw_enforced:AuthSet | nonce:12 | ciphertext:N | tag:16
//!
//! Integrity-assured (version 1):
//!   version:u8 | key_len:u32 | key_material:key_len | hw_enforced:AuthSet | sw_enforced:AuthSet
//!   | mac:8
//! ```
//!
//! Auth-encrypted blobs protect the key material with AES-256-GCM under a per-blob key that is
//! derived from the master key and from the hidden, hardware-enforced and software-enforced
//! authorizations.  Integrity-assured blobs hold the key material in the clear, guarded by a
//! truncated HMAC over the blob and the hidden authorizations.

use crate::{
    crypto::{self, aes, SHA256_DIGEST_LEN},
    km_err,
    tag::AuthorizationSet,
    try_to_vec, vec_try,
    wire::keymint::Digest,
    Error, FallibleAllocExt,
};
use alloc::vec::Vec;
use core::convert::TryInto;
use log::warn;
use zeroize::Zeroizing;

#[cfg(test)]
mod tests;

/// Version byte of an auth-encrypted key blob.
pub const AUTH_ENCRYPTED_VERSION: u8 = 0;

/// Version byte of an integrity-assured key blob.
pub const INTEGRITY_ASSURED_VERSION: u8 = 1;

/// Fixed HMAC key used for integrity-assured key blobs.
pub const INTEGRITY_MAC_KEY: &[u8] = b"IntegrityAssuredBlob0\0";

/// Length of the truncated MAC on an integrity-assured key blob.
pub const INTEGRITY_MAC_LEN: usize = 8;

/// Length of the AES-GCM nonce in an auth-encrypted key blob.
pub const NONCE_LEN: usize = aes::GCM_NONCE_SIZE;

/// Length of the AES-GCM tag in an auth-encrypted key blob.
pub const TAG_LEN: usize = 16;

/// Key blob layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    AuthEncrypted,
    IntegrityAssured,
}

impl Format {
    /// Determine the layout of an encoded key blob from its version byte.
    pub fn of(data: &[u8]) -> Result<Self, Error> {
        match data.first() {
            Some(&AUTH_ENCRYPTED_VERSION) => Ok(Format::AuthEncrypted),
            Some(&INTEGRITY_ASSURED_VERSION) => Ok(Format::IntegrityAssured),
            Some(v) => Err(km_err!(InvalidKeyBlob, "unknown key blob version {}", v)),
            None => Err(km_err!(InvalidKeyBlob, "empty key blob")),
        }
    }
}

/// Plaintext key blob.
#[derive(Clone, PartialEq, Eq)]
pub struct PlaintextKeyBlob {
    /// Raw key material, cleared on drop.
    pub key_material: Zeroizing<Vec<u8>>,
    /// Authorizations enforced by the secure environment.
    pub hw_enforced: AuthorizationSet,
    /// Authorizations enforced by software only.
    pub sw_enforced: AuthorizationSet,
}

/// Manual implementation of [`Debug`] that skips emitting plaintext key material.
impl core::fmt::Debug for PlaintextKeyBlob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PlaintextKeyBlob")
            .field("key_material", &"...")
            .field("hw_enforced", &self.hw_enforced)
            .field("sw_enforced", &self.sw_enforced)
            .finish()
    }
}

/// Derive the AES-256 key that protects an auth-encrypted key blob:
///
/// ```text
/// AES-256-ECB(master_key, SHA-256(hidden || hw_enforced || sw_enforced))
/// ```
///
/// where each authorization set is in its serialized form.
pub fn derive_wrapping_key(
    aes: &dyn crypto::Aes,
    sha256: &dyn crypto::Sha256,
    master_key: &aes::Key,
    hidden: &AuthorizationSet,
    hw_enforced: &AuthorizationSet,
    sw_enforced: &AuthorizationSet,
) -> Result<aes::Key, Error> {
    let hidden = hidden.serialize()?;
    let hw = hw_enforced.serialize()?;
    let sw = sw_enforced.serialize()?;
    let digest: Zeroizing<[u8; SHA256_DIGEST_LEN]> =
        Zeroizing::new(sha256.hash_chunks(&[&hidden, &hw, &sw])?);

    let mut op = aes.begin(
        master_key.clone(),
        aes::CipherMode::EcbNoPadding,
        crypto::SymmetricOperation::Encrypt,
    )?;
    let mut derived = Zeroizing::new(op.update(&digest[..])?);
    derived.try_extend_from_slice(&op.finish()?)?;
    if derived.len() != SHA256_DIGEST_LEN {
        return Err(km_err!(UnknownError, "derived {} bytes of wrapping key", derived.len()));
    }
    aes::Key::new_from(&derived)
}

/// Consume a plaintext keyblob and emit an auth-encrypted version.
pub fn encrypt(
    aes: &dyn crypto::Aes,
    sha256: &dyn crypto::Sha256,
    rng: &mut dyn crypto::Rng,
    master_key: &aes::Key,
    plaintext_keyblob: &PlaintextKeyBlob,
    hidden: &AuthorizationSet,
) -> Result<Vec<u8>, Error> {
    let kek = derive_wrapping_key(
        aes,
        sha256,
        master_key,
        hidden,
        &plaintext_keyblob.hw_enforced,
        &plaintext_keyblob.sw_enforced,
    )?;
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce)?;

    let mut op = aes.begin_aead(
        kek,
        aes::GcmMode::GcmTag16 { nonce },
        crypto::SymmetricOperation::Encrypt,
    )?;
    let mut ct = op.update(&plaintext_keyblob.key_material)?;
    ct.try_extend_from_slice(&op.finish()?)?;

    let mut result = vec_try![AUTH_ENCRYPTED_VERSION]?;
    plaintext_keyblob.hw_enforced.serialize_into(&mut result)?;
    plaintext_keyblob.sw_enforced.serialize_into(&mut result)?;
    result.try_extend_from_slice(&nonce)?;
    result.try_extend_from_slice(&ct)?;
    Ok(result)
}

/// Emit an integrity-assured version of a plaintext keyblob.
pub fn integrity_assure(
    hmac: &dyn crypto::Hmac,
    plaintext_keyblob: &PlaintextKeyBlob,
    hidden: &AuthorizationSet,
) -> Result<Vec<u8>, Error> {
    let key_len: u32 = plaintext_keyblob.key_material.len().try_into()?;
    let mut result = vec_try![INTEGRITY_ASSURED_VERSION]?;
    result.try_extend_from_slice(&key_len.to_be_bytes())?;
    result.try_extend_from_slice(&plaintext_keyblob.key_material)?;
    plaintext_keyblob.hw_enforced.serialize_into(&mut result)?;
    plaintext_keyblob.sw_enforced.serialize_into(&mut result)?;
    let mac = integrity_mac(hmac, &result, hidden)?;
    result.try_extend_from_slice(&mac)?;
    Ok(result)
}

/// Compute the truncated HMAC-SHA256 over `data || hidden`.
fn integrity_mac(
    hmac: &dyn crypto::Hmac,
    data: &[u8],
    hidden: &AuthorizationSet,
) -> Result<[u8; INTEGRITY_MAC_LEN], Error> {
    let mut op = hmac.begin(crypto::hmac::Key::new_from(INTEGRITY_MAC_KEY)?, Digest::Sha256)?;
    op.update(data)?;
    op.update(&hidden.serialize()?)?;
    let tag = op.finish()?;
    tag.get(..INTEGRITY_MAC_LEN)
        .and_then(|t| t.try_into().ok())
        .ok_or_else(|| km_err!(UnknownError, "HMAC output of {} bytes too short", tag.len()))
}

/// Read one serialized authorization set from the front of `data`.
fn take_auth_set(data: &mut &[u8]) -> Result<AuthorizationSet, Error> {
    AuthorizationSet::deserialize_prefix(data)
        .map_err(|e| km_err!(InvalidKeyBlob, "failed to parse authorizations: {:?}", e))
}

/// Constituent parts of an encoded auth-encrypted key blob.
#[derive(Debug)]
pub(crate) struct AuthEncryptedParts<'a> {
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext followed by the tag.
    pub ciphertext: &'a [u8],
}

/// Split an encoded auth-encrypted key blob into its parts, without decrypting.
pub(crate) fn split_auth_encrypted(data: &[u8]) -> Result<AuthEncryptedParts<'_>, Error> {
    let mut rest = match data.split_first() {
        Some((&AUTH_ENCRYPTED_VERSION, rest)) => rest,
        _ => return Err(km_err!(InvalidKeyBlob, "not an auth-encrypted key blob")),
    };
    let hw_enforced = take_auth_set(&mut rest)?;
    let sw_enforced = take_auth_set(&mut rest)?;
    if rest.len() < NONCE_LEN + TAG_LEN {
        return Err(km_err!(InvalidKeyBlob, "key blob too short for nonce and tag"));
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] =
        nonce.try_into().map_err(|_e| km_err!(InvalidKeyBlob, "bad key blob nonce"))?;
    Ok(AuthEncryptedParts { hw_enforced, sw_enforced, nonce, ciphertext })
}

/// Constituent parts of an encoded integrity-assured key blob.
#[derive(Debug)]
pub(crate) struct IntegrityAssuredParts<'a> {
    pub key_material: &'a [u8],
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
    /// Everything before the MAC.
    pub signed: &'a [u8],
    pub mac: &'a [u8],
}

/// Split an encoded integrity-assured key blob into its parts, without checking the MAC.
pub(crate) fn split_integrity_assured(data: &[u8]) -> Result<IntegrityAssuredParts<'_>, Error> {
    if data.len() < 1 + 4 + INTEGRITY_MAC_LEN || data[0] != INTEGRITY_ASSURED_VERSION {
        return Err(km_err!(InvalidKeyBlob, "not an integrity-assured key blob"));
    }
    let (signed, mac) = data.split_at(data.len() - INTEGRITY_MAC_LEN);
    let mut rest = &signed[1..];
    let key_len = u32::from_be_bytes(
        rest[..4].try_into().map_err(|_e| km_err!(InvalidKeyBlob, "bad key length"))?,
    ) as usize;
    rest = &rest[4..];
    if key_len > rest.len() {
        return Err(km_err!(InvalidKeyBlob, "key length {} exceeds blob", key_len));
    }
    let (key_material, mut rest) = rest.split_at(key_len);
    let hw_enforced = take_auth_set(&mut rest)?;
    let sw_enforced = take_auth_set(&mut rest)?;
    if !rest.is_empty() {
        return Err(km_err!(InvalidKeyBlob, "{} trailing bytes in key blob", rest.len()));
    }
    Ok(IntegrityAssuredParts { key_material, hw_enforced, sw_enforced, signed, mac })
}

/// Consume an encoded keyblob of either layout and emit the decrypted version.  Fails with
/// `ErrorCode::InvalidKeyBlob` if the blob has been altered or if `hidden` differs from the
/// hidden authorizations it was created with; no plaintext is returned in that case.
pub fn decrypt(
    aes: &dyn crypto::Aes,
    sha256: &dyn crypto::Sha256,
    hmac: &dyn crypto::Hmac,
    compare: &dyn crypto::ConstTimeEq,
    master_key: &aes::Key,
    data: &[u8],
    hidden: &AuthorizationSet,
) -> Result<PlaintextKeyBlob, Error> {
    match Format::of(data)? {
        Format::AuthEncrypted => {
            let parts = split_auth_encrypted(data)?;
            let kek = derive_wrapping_key(
                aes,
                sha256,
                master_key,
                hidden,
                &parts.hw_enforced,
                &parts.sw_enforced,
            )?;
            let mut op = aes.begin_aead(
                kek,
                aes::GcmMode::GcmTag16 { nonce: parts.nonce },
                crypto::SymmetricOperation::Decrypt,
            )?;
            // Plaintext emitted ahead of the tag check is cleared on any failure below.
            let mut pt = Zeroizing::new(op.update(parts.ciphertext)?);
            let tail = op.finish().map_err(|e| {
                warn!("key blob failed authentication");
                km_err!(InvalidKeyBlob, "failed to decrypt keyblob: {:?}", e)
            })?;
            pt.try_extend_from_slice(&tail)?;
            Ok(PlaintextKeyBlob {
                key_material: pt,
                hw_enforced: parts.hw_enforced,
                sw_enforced: parts.sw_enforced,
            })
        }
        Format::IntegrityAssured => {
            let parts = split_integrity_assured(data)?;
            let mac = integrity_mac(hmac, parts.signed, hidden)?;
            if compare.ne(&mac, parts.mac) {
                warn!("key blob failed integrity check");
                return Err(km_err!(InvalidKeyBlob, "integrity check failed"));
            }
            Ok(PlaintextKeyBlob {
                key_material: Zeroizing::new(try_to_vec(parts.key_material)?),
                hw_enforced: parts.hw_enforced,
                sw_enforced: parts.sw_enforced,
            })
        }
    }
}
