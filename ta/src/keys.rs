//! Key objects and the per-algorithm key factories that generate, import and load them.

use crate::{
    context::KeymasterContext,
    operation::{AesOperationFactory, HmacOperationFactory, OperationFactory, RsaOperationFactory},
};
use alloc::vec::Vec;
use skm_common::{
    crypto::{aes, KeyMaterial},
    get_opt_tag_value, get_tag_value,
    keyblob::PlaintextKeyBlob,
    km_err, tag,
    tag::AuthorizationSet,
    wire::keymint::{Algorithm, ErrorCode, KeyFormat, KeyOrigin, KeyParam, KeyPurpose},
    Error, FallibleAllocExt,
};
use log::warn;

/// The authorizations of a key, split by where they are enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyCharacteristics {
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
}

/// Result of generating or importing a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCreationResult {
    pub key_blob: Vec<u8>,
    pub characteristics: KeyCharacteristics,
}

/// A loaded key: plaintext key material together with its authorizations.  Immutable once
/// loaded.
#[derive(Clone)]
pub struct Key {
    pub(crate) material: KeyMaterial,
    pub hw_enforced: AuthorizationSet,
    pub sw_enforced: AuthorizationSet,
}

impl Key {
    pub fn algorithm(&self) -> Algorithm {
        self.material.algorithm()
    }

    /// All of the key's authorizations, hardware-enforced first.
    pub fn characteristics(&self) -> Result<Vec<KeyParam>, Error> {
        let mut chars = Vec::new();
        chars.try_extend_from_slice(&self.hw_enforced)?;
        chars.try_extend_from_slice(&self.sw_enforced)?;
        Ok(chars)
    }
}

/// Manual implementation of [`Debug`] that skips emitting plaintext key material.
impl core::fmt::Debug for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Key")
            .field("material", &self.material)
            .field("hw_enforced", &self.hw_enforced)
            .field("sw_enforced", &self.sw_enforced)
            .finish()
    }
}

/// Per-algorithm key creation and loading.
pub(crate) trait KeyFactory: Send + Sync {
    /// Algorithm that the factory handles.
    fn algorithm(&self) -> Algorithm;

    /// Generate a fresh key described by `params`.
    fn generate_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
    ) -> Result<KeyCreationResult, Error>;

    /// Import key material `data` held in `format`, described by `params`.
    fn import_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
        format: KeyFormat,
        data: &[u8],
    ) -> Result<KeyCreationResult, Error>;

    /// Rebuild a [`Key`] from a decoded key blob.
    fn load_key(&self, plaintext: PlaintextKeyBlob) -> Result<Key, Error> {
        let material = KeyMaterial::from_raw(self.algorithm(), &plaintext.key_material)?;
        Ok(Key { material, hw_enforced: plaintext.hw_enforced, sw_enforced: plaintext.sw_enforced })
    }

    /// Return the factory for operations of the given `purpose`.
    fn operation_factory(&self, purpose: KeyPurpose) -> Result<&dyn OperationFactory, Error>;

    /// Formats that [`KeyFactory::import_key`] accepts.
    fn supported_import_formats(&self) -> &'static [KeyFormat];

    /// Formats that the public half of a key can be exported in.
    fn supported_export_formats(&self) -> &'static [KeyFormat] {
        &[]
    }
}

/// Reject key creation requests that hold a purpose the algorithm cannot perform.
fn check_purposes(algorithm: Algorithm, params: &[KeyParam]) -> Result<(), Error> {
    for param in params {
        if let KeyParam::Purpose(purpose) = param {
            if !tag::purpose_supported(algorithm, *purpose) {
                return Err(km_err!(
                    UnsupportedPurpose,
                    "purpose {:?} not supported for {:?} keys",
                    purpose,
                    algorithm
                ));
            }
        }
    }
    Ok(())
}

/// Reject import formats that a factory does not handle.
fn check_import_format(
    algorithm: Algorithm,
    format: KeyFormat,
    supported: &[KeyFormat],
) -> Result<(), Error> {
    if supported.contains(&format) {
        Ok(())
    } else {
        Err(km_err!(
            UnsupportedKeyFormat,
            "import format {:?} not supported for {:?} keys",
            format,
            algorithm
        ))
    }
}

/// Combine the request `params` with the characteristics deduced from the key material.
fn with_deduced(params: &[KeyParam], deduced: Vec<KeyParam>) -> Result<Vec<KeyParam>, Error> {
    let mut all = Vec::new();
    all.try_extend_from_slice(params)?;
    for param in deduced {
        all.try_push(param)?;
    }
    Ok(all)
}

pub(crate) struct AesKeyFactory {
    encrypt: AesOperationFactory,
    decrypt: AesOperationFactory,
}

impl Default for AesKeyFactory {
    fn default() -> Self {
        Self {
            encrypt: AesOperationFactory::new(KeyPurpose::Encrypt),
            decrypt: AesOperationFactory::new(KeyPurpose::Decrypt),
        }
    }
}

impl KeyFactory for AesKeyFactory {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes
    }

    fn generate_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
    ) -> Result<KeyCreationResult, Error> {
        check_purposes(Algorithm::Aes, params)?;
        let key_size = get_tag_value!(params, KeySize, ErrorCode::UnsupportedKeySize)?;
        let variant = aes::Variant::new(key_size)?;
        tag::check_aes_params(params)?;
        let material = ctx.with_rng(|rng| ctx.aes.generate_key(rng, variant))?;
        ctx.create_key_blob(params, KeyOrigin::Generated, &material)
    }

    fn import_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
        format: KeyFormat,
        data: &[u8],
    ) -> Result<KeyCreationResult, Error> {
        check_import_format(Algorithm::Aes, format, self.supported_import_formats())?;
        check_purposes(Algorithm::Aes, params)?;
        let (material, key_size) = ctx.aes.import_key(data)?;
        let deduced = tag::require_matching_key_size(params, key_size)?;
        tag::check_aes_params(params)?;
        let chars = with_deduced(params, deduced)?;
        ctx.create_key_blob(&chars, KeyOrigin::Imported, &material)
    }

    fn operation_factory(&self, purpose: KeyPurpose) -> Result<&dyn OperationFactory, Error> {
        match purpose {
            KeyPurpose::Encrypt => Ok(&self.encrypt),
            KeyPurpose::Decrypt => Ok(&self.decrypt),
            _ => Err(km_err!(UnsupportedPurpose, "purpose {:?} not supported for AES", purpose)),
        }
    }

    fn supported_import_formats(&self) -> &'static [KeyFormat] {
        &[KeyFormat::Raw]
    }
}

pub(crate) struct HmacKeyFactory {
    sign: HmacOperationFactory,
    verify: HmacOperationFactory,
}

impl Default for HmacKeyFactory {
    fn default() -> Self {
        Self {
            sign: HmacOperationFactory::new(KeyPurpose::Sign),
            verify: HmacOperationFactory::new(KeyPurpose::Verify),
        }
    }
}

impl KeyFactory for HmacKeyFactory {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hmac
    }

    fn generate_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
    ) -> Result<KeyCreationResult, Error> {
        check_purposes(Algorithm::Hmac, params)?;
        let key_size = get_tag_value!(params, KeySize, ErrorCode::UnsupportedKeySize)?;
        tag::check_hmac_params(params, key_size)?;
        let material = ctx.with_rng(|rng| ctx.hmac.generate_key(rng, key_size))?;
        ctx.create_key_blob(params, KeyOrigin::Generated, &material)
    }

    fn import_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
        format: KeyFormat,
        data: &[u8],
    ) -> Result<KeyCreationResult, Error> {
        check_import_format(Algorithm::Hmac, format, self.supported_import_formats())?;
        check_purposes(Algorithm::Hmac, params)?;
        let (material, key_size) = ctx.hmac.import_key(data)?;
        let deduced = tag::require_matching_key_size(params, key_size)?;
        tag::check_hmac_params(params, key_size)?;
        let chars = with_deduced(params, deduced)?;
        ctx.create_key_blob(&chars, KeyOrigin::Imported, &material)
    }

    fn operation_factory(&self, purpose: KeyPurpose) -> Result<&dyn OperationFactory, Error> {
        match purpose {
            KeyPurpose::Sign => Ok(&self.sign),
            KeyPurpose::Verify => Ok(&self.verify),
            _ => Err(km_err!(UnsupportedPurpose, "purpose {:?} not supported for HMAC", purpose)),
        }
    }

    fn supported_import_formats(&self) -> &'static [KeyFormat] {
        &[KeyFormat::Raw]
    }
}

pub(crate) struct RsaKeyFactory {
    encrypt: RsaOperationFactory,
    decrypt: RsaOperationFactory,
    sign: RsaOperationFactory,
    verify: RsaOperationFactory,
}

impl Default for RsaKeyFactory {
    fn default() -> Self {
        Self {
            encrypt: RsaOperationFactory::new(KeyPurpose::Encrypt),
            decrypt: RsaOperationFactory::new(KeyPurpose::Decrypt),
            sign: RsaOperationFactory::new(KeyPurpose::Sign),
            verify: RsaOperationFactory::new(KeyPurpose::Verify),
        }
    }
}

impl KeyFactory for RsaKeyFactory {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Rsa
    }

    fn generate_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
    ) -> Result<KeyCreationResult, Error> {
        check_purposes(Algorithm::Rsa, params)?;
        let key_size = get_tag_value!(params, KeySize, ErrorCode::UnsupportedKeySize)?;
        let exponent = get_tag_value!(params, RsaPublicExponent, ErrorCode::InvalidArgument)?;
        tag::check_rsa_params(key_size, exponent)?;
        let material = ctx.with_rng(|rng| ctx.rsa.generate_key(rng, key_size, exponent))?;
        ctx.create_key_blob(params, KeyOrigin::Generated, &material)
    }

    fn import_key(
        &self,
        ctx: &KeymasterContext,
        params: &[KeyParam],
        format: KeyFormat,
        data: &[u8],
    ) -> Result<KeyCreationResult, Error> {
        check_import_format(Algorithm::Rsa, format, self.supported_import_formats())?;
        check_purposes(Algorithm::Rsa, params)?;
        let (material, key_size, exponent) = ctx.rsa.import_pkcs8_key(data, params)?;
        let mut deduced = tag::require_matching_key_size(params, key_size)?;
        match get_opt_tag_value!(params, RsaPublicExponent)? {
            Some(param_exponent) => {
                if *param_exponent != exponent {
                    warn!("RSA import with exponent {} for key with {}", param_exponent.0, exponent.0);
                    return Err(km_err!(
                        ImportParameterMismatch,
                        "specified RSA_PUBLIC_EXPONENT {:?} != actual exponent {:?}",
                        param_exponent,
                        exponent
                    ));
                }
            }
            None => deduced.try_push(KeyParam::RsaPublicExponent(exponent))?,
        }
        tag::check_rsa_params(key_size, exponent)?;
        let chars = with_deduced(params, deduced)?;
        ctx.create_key_blob(&chars, KeyOrigin::Imported, &material)
    }

    fn operation_factory(&self, purpose: KeyPurpose) -> Result<&dyn OperationFactory, Error> {
        match purpose {
            KeyPurpose::Encrypt => Ok(&self.encrypt),
            KeyPurpose::Decrypt => Ok(&self.decrypt),
            KeyPurpose::Sign => Ok(&self.sign),
            KeyPurpose::Verify => Ok(&self.verify),
            _ => Err(km_err!(UnsupportedPurpose, "purpose {:?} not supported for RSA", purpose)),
        }
    }

    fn supported_import_formats(&self) -> &'static [KeyFormat] {
        &[KeyFormat::Pkcs8]
    }

    fn supported_export_formats(&self) -> &'static [KeyFormat] {
        &[KeyFormat::X509]
    }
}
