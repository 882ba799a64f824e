//! Generation of attestation records and the certificates that carry them.

use crate::{
    config::{AttestedSecurityLevel, BatchConfig, KeymasterConfig},
    context::KeymasterContext,
    keys::Key,
};
use alloc::{boxed::Box, vec::Vec};
use core::time::Duration;
use der::{
    asn1::{BitStringRef, GeneralizedTime, OctetStringRef, UIntRef, UtcTime},
    oid::AssociatedOid,
    Decode, Encode, Enumerated, ErrorKind, Sequence,
};
use flagset::FlagSet;
use log::{info, warn};
use skm_common::{
    crypto::{rsa, KeyMaterial, SHA256_DIGEST_LEN},
    get_bool_tag_value, get_opt_tag_value, km_err, try_to_vec, vec_try_with_capacity,
    wire::{
        keymint::{
            self, raw_tag_value, DateTime, Digest, KeyParam, KeyPurpose, Tag,
            DEFAULT_CERT_SUBJECT,
        },
        KeySizeInBits, RsaExponent,
    },
    Error, FallibleAllocExt,
};
use spki::{AlgorithmIdentifier, ObjectIdentifier, SubjectPublicKeyInfo};
use x509_cert::{
    certificate::{Certificate, TbsCertificate, Version},
    ext::pkix::{constraints::BasicConstraints, KeyUsage, KeyUsages},
    ext::Extension,
    name::RdnSequence,
    time::Time,
};

/// Version of the attestation record schema.
pub const ATTESTATION_VERSION: i32 = 2;

/// Keymaster version reported in attestation records.
pub const KEYMASTER_VERSION: i32 = 3;

/// OID value for the Android Attestation extension.
pub const ATTESTATION_EXTENSION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.1.17");

/// OID for the X.509 subject key identifier extension (RFC 5280 s4.2.1.2).
pub const SUBJECT_KEY_IDENTIFIER_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// OID for the X.509 authority key identifier extension (RFC 5280 s4.2.1.1).
pub const AUTHORITY_KEY_IDENTIFIER_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.35");

/// Maximum size of an attestation challenge value.
const MAX_ATTESTATION_CHALLENGE_LEN: usize = 128;

/// 9999-12-31T23:59:59Z, the latest time an X.509 validity field can express.
const MAX_NOT_AFTER_MS: i64 = 253_402_300_799_000;

/// Length of a key identifier: a truncated SHA-256 of the subject public key.
const KEY_ID_LEN: usize = 20;

const CERT_SERIAL: &[u8] = &[1];

const BATCH_KEY_SIZE: KeySizeInBits = KeySizeInBits(2048);
const BATCH_KEY_EXPONENT: RsaExponent = RsaExponent(65537);

/// ASN.1 DER encoding of the generated batch certificate subject of 'CN=Soft Keymaster Batch'.
pub const BATCH_CERT_SUBJECT: &[u8] = &[
    0x30, 0x1f, // SEQUENCE len 31
    0x31, 0x1d, // SET len 29
    0x30, 0x1b, // SEQUENCE len 27
    0x06, 0x03, // OBJECT IDENTIFIER len 3
    0x55, 0x04, 0x03, // 2.5.4.3 (commonName)
    0x0c, 0x14, // UTF8String len 20
    0x53, 0x6f, 0x66, 0x74, 0x20, 0x4b, 0x65, 0x79, 0x6d, 0x61, 0x73, 0x74, 0x65, 0x72, 0x20, 0x42,
    0x61, 0x74, 0x63, 0x68, // "Soft Keymaster Batch"
];

/// Batch attestation key together with its certificate.
pub(crate) struct BatchSigner {
    key: rsa::Key,
    /// DER-encoded certificate.
    cert: Vec<u8>,
    /// DER-encoded subject of `cert`, used as the issuer of attestation certificates.
    subject: Vec<u8>,
    /// Subject key identifier of `cert`, if it has one.
    key_id: Option<Vec<u8>>,
}

impl BatchSigner {
    /// Load a provisioned batch key and certificate.
    pub fn from_config(ctx: &KeymasterContext, batch: &BatchConfig) -> Result<Self, Error> {
        let (material, _, _) = ctx
            .rsa
            .import_pkcs8_key(&batch.key, &[])
            .map_err(|e| km_err!(InvalidArgument, "failed to parse batch key: {:?}", e))?;
        let key = match material {
            KeyMaterial::Rsa(k) => k,
            other => {
                return Err(km_err!(
                    InvalidArgument,
                    "batch key is {:?}, not RSA",
                    other.algorithm()
                ))
            }
        };
        let cert = Certificate::from_der(&batch.cert)
            .map_err(|e| km_err!(InvalidArgument, "failed to parse batch certificate: {:?}", e))?;
        let cert_spki = cert.tbs_certificate.subject_public_key_info.to_vec()?;
        if cert_spki != key.subject_public_key_info_der()? {
            return Err(km_err!(InvalidArgument, "batch certificate is not for batch key"));
        }
        let subject = cert.tbs_certificate.subject.to_vec()?;
        let key_id = subject_key_id(&cert)?;
        info!("loaded provisioned batch attestation certificate");
        Ok(Self { key, cert: try_to_vec(&batch.cert)?, subject, key_id })
    }

    /// Generate a fresh batch key with a self-signed certificate.
    pub fn generate(ctx: &KeymasterContext) -> Result<Self, Error> {
        let material = ctx
            .with_rng(|rng| ctx.rsa.generate_key(rng, BATCH_KEY_SIZE, BATCH_KEY_EXPONENT))?;
        let key = match material {
            KeyMaterial::Rsa(k) => k,
            other => {
                return Err(km_err!(UnknownError, "generated {:?} batch key", other.algorithm()))
            }
        };

        let mut spki_buf = Vec::new();
        let spki = key.subject_public_key_info(&mut spki_buf)?;
        let key_id = key_identifier(ctx, spki.subject_public_key)?;
        let key_usage = asn1_der_encode(&KeyUsage(KeyUsages::KeyCertSign.into()))?;
        let basic_constraints = asn1_der_encode(&basic_constraints_ext_value(true))?;
        let ski = asn1_der_encode(&OctetStringRef::new(&key_id)?)?;

        let mut extensions = vec_try_with_capacity!(3)?;
        extensions.push(Extension { extn_id: KeyUsage::OID, critical: true, extn_value: &key_usage }); // capacity enough
        extensions.push(Extension {
            extn_id: BasicConstraints::OID,
            critical: true,
            extn_value: &basic_constraints,
        }); // capacity enough
        extensions.push(Extension {
            extn_id: SUBJECT_KEY_IDENTIFIER_OID,
            critical: false,
            extn_value: &ski,
        }); // capacity enough

        let tbs = tbs_certificate(
            BATCH_CERT_SUBJECT,
            BATCH_CERT_SUBJECT,
            ctx.now(),
            DateTime { ms_since_epoch: MAX_NOT_AFTER_MS },
            spki,
            extensions,
        )?;
        let sig = sign_pkcs1_sha256(ctx, &key, &asn1_der_encode(&tbs)?)?;
        let cert = asn1_der_encode(&certificate(tbs, &sig)?)?;
        info!("generated batch attestation key and self-signed certificate");
        Ok(Self { key, cert, subject: try_to_vec(BATCH_CERT_SUBJECT)?, key_id: Some(key_id) })
    }

    /// DER-encoded batch certificate.
    pub fn cert(&self) -> &[u8] {
        &self.cert
    }
}

/// Build an attestation certificate chain for `key`: a leaf certificate holding the attestation
/// record, followed by the batch certificate.
pub(crate) fn attest_key(
    ctx: &KeymasterContext,
    key: &Key,
    params: &[KeyParam],
) -> Result<Vec<Vec<u8>>, Error> {
    let challenge = get_opt_tag_value!(params, AttestationChallenge)?
        .ok_or_else(|| km_err!(AttestationChallengeMissing, "no attestation challenge"))?;
    if challenge.len() > MAX_ATTESTATION_CHALLENGE_LEN {
        return Err(km_err!(
            InvalidInputLength,
            "attestation challenge too big: {}",
            challenge.len()
        ));
    }
    let app_id = get_opt_tag_value!(params, AttestationApplicationId)?.ok_or_else(|| {
        km_err!(AttestationApplicationIdMissing, "no attestation application ID")
    })?;
    let rsa_key = match &key.material {
        KeyMaterial::Rsa(k) => k,
        other => {
            return Err(km_err!(
                IncompatibleAlgorithm,
                "cannot attest {:?} key",
                other.algorithm()
            ))
        }
    };
    let device_ids = check_device_ids(&ctx.config, params)?;

    let unique_id = if get_bool_tag_value!(&key.hw_enforced, IncludeUniqueId)? {
        let creation = get_opt_tag_value!(&key.sw_enforced, CreationDatetime)?
            .ok_or_else(|| km_err!(InvalidKeyBlob, "key has no creation time"))?;
        let uid_app_id = get_opt_tag_value!(params, ApplicationId)?.map_or(&[][..], |v| &v[..]);
        let reset = get_bool_tag_value!(params, ResetSinceIdRotation)?;
        ctx.unique_id(*creation, uid_app_id, reset)?
    } else {
        Vec::new()
    };

    let attestation_level = security_level(ctx.config.security_level.into());
    let keymaster_level = if key.hw_enforced.is_empty() {
        SecurityLevel::Software
    } else {
        SecurityLevel::TrustedEnvironment
    };
    let (sw_ids, hw_ids): (&[KeyParam], &[KeyParam]) = match ctx.config.security_level {
        AttestedSecurityLevel::Software => (&device_ids[..], &[][..]),
        AttestedSecurityLevel::TrustedEnvironment => (&[][..], &device_ids[..]),
    };
    let rot = &ctx.config.root_of_trust;
    let record = KeyDescription {
        attestation_version: ATTESTATION_VERSION,
        attestation_security_level: attestation_level,
        keymaster_version: KEYMASTER_VERSION,
        keymaster_security_level: keymaster_level,
        attestation_challenge: challenge,
        unique_id: &unique_id,
        software_enforced: AuthorizationList {
            auths: &key.sw_enforced,
            root_of_trust: None,
            app_id: Some(app_id),
            device_ids: sw_ids,
        },
        tee_enforced: AuthorizationList {
            auths: &key.hw_enforced,
            root_of_trust: Some(RootOfTrust {
                verified_boot_key: &rot.verified_boot_key,
                device_locked: rot.device_locked,
                verified_boot_state: keymint::VerifiedBootState::from(rot.verified_boot_state)
                    .into(),
            }),
            app_id: None,
            device_ids: hw_ids,
        },
    };
    let record = asn1_der_encode(&record)?;

    let batch = ctx.batch()?;
    let chars = key.characteristics()?;
    let key_usage = key_usage_extension_bits(&chars);
    let key_usage = if key_usage.0.is_empty() { None } else { Some(asn1_der_encode(&key_usage)?) };
    let aki = match &batch.key_id {
        Some(key_id) => Some(asn1_der_encode(&AuthorityKeyIdentifier {
            key_identifier: Some(OctetStringRef::new(key_id)?),
        })?),
        None => None,
    };

    let mut extensions = vec_try_with_capacity!(3)?;
    if let Some(key_usage) = &key_usage {
        extensions.push(Extension { extn_id: KeyUsage::OID, critical: true, extn_value: key_usage }); // capacity enough
    }
    extensions.push(Extension {
        extn_id: ATTESTATION_EXTENSION_OID,
        critical: false,
        extn_value: &record,
    }); // capacity enough
    if let Some(aki) = &aki {
        extensions.push(Extension {
            extn_id: AUTHORITY_KEY_IDENTIFIER_OID,
            critical: false,
            extn_value: aki,
        }); // capacity enough
    }

    let not_before = get_opt_tag_value!(&chars, ActiveDatetime)?
        .copied()
        .unwrap_or(DateTime { ms_since_epoch: 0 });
    let not_after = get_opt_tag_value!(&chars, UsageExpireDatetime)?
        .copied()
        .unwrap_or(DateTime { ms_since_epoch: MAX_NOT_AFTER_MS });
    let mut spki_buf = Vec::new();
    let spki = rsa_key.subject_public_key_info(&mut spki_buf)?;
    let tbs = tbs_certificate(
        &batch.subject,
        DEFAULT_CERT_SUBJECT,
        not_before,
        not_after,
        spki,
        extensions,
    )?;
    let sig = sign_pkcs1_sha256(ctx, &batch.key, &asn1_der_encode(&tbs)?)?;
    let leaf = asn1_der_encode(&certificate(tbs, &sig)?)?;

    let mut chain = vec_try_with_capacity!(2)?;
    chain.push(leaf); // capacity enough
    chain.push(try_to_vec(batch.cert())?); // capacity enough
    Ok(chain)
}

/// Macro to check that a requested attestation ID matches the provisioned value.  Empty
/// provisioned values never match.
macro_rules! check_attestation_id {
    {
        $params:expr, $variant:ident, $provisioned:expr
    } => {
        {
            if let Some(val) = get_opt_tag_value!($params, $variant)? {
                let want: &str = &$provisioned;
                if want.is_empty() || val.as_slice() != want.as_bytes() {
                    return Err(km_err!(CannotAttestIds,
                                       "attestation ID mismatch for {}",
                                       stringify!($variant)));
                }
            }
        }
    }
}

/// Check the device identifiers requested in `params` against the provisioned values, returning
/// the identifier parameters to include in the attestation record.
fn check_device_ids(config: &KeymasterConfig, params: &[KeyParam]) -> Result<Vec<KeyParam>, Error> {
    let mut ids = Vec::new();
    for param in params {
        if matches!(
            param,
            KeyParam::AttestationIdBrand(_)
                | KeyParam::AttestationIdDevice(_)
                | KeyParam::AttestationIdProduct(_)
                | KeyParam::AttestationIdSerial(_)
                | KeyParam::AttestationIdImei(_)
                | KeyParam::AttestationIdMeid(_)
                | KeyParam::AttestationIdManufacturer(_)
                | KeyParam::AttestationIdModel(_)
        ) {
            ids.try_push(param.clone())?;
        }
    }
    if ids.is_empty() {
        return Ok(ids);
    }
    let provisioned = match (&config.attestation_ids, config.supports_device_id_attestation) {
        (Some(provisioned), true) => provisioned,
        _ => {
            warn!("device ID attestation requested but not supported");
            return Err(km_err!(CannotAttestIds, "device ID attestation not supported"));
        }
    };
    check_attestation_id!(params, AttestationIdBrand, provisioned.brand);
    check_attestation_id!(params, AttestationIdDevice, provisioned.device);
    check_attestation_id!(params, AttestationIdProduct, provisioned.product);
    check_attestation_id!(params, AttestationIdSerial, provisioned.serial);
    check_attestation_id!(params, AttestationIdImei, provisioned.imei);
    check_attestation_id!(params, AttestationIdMeid, provisioned.meid);
    check_attestation_id!(params, AttestationIdManufacturer, provisioned.manufacturer);
    check_attestation_id!(params, AttestationIdModel, provisioned.model);
    Ok(ids)
}

/// Build an ASN.1 DER-encodable `Certificate`.
pub(crate) fn certificate<'a>(
    tbs_cert: TbsCertificate<'a>,
    sig_val: &'a [u8],
) -> Result<Certificate<'a>, Error> {
    Ok(Certificate {
        signature_algorithm: tbs_cert.signature,
        tbs_certificate: tbs_cert,
        signature: BitStringRef::new(0, sig_val)?,
    })
}

/// Build an ASN.1 DER-encodable `tbsCertificate` signed with PKCS#1 v1.5 SHA-256.
pub(crate) fn tbs_certificate<'a>(
    issuer: &'a [u8],
    subject: &'a [u8],
    not_before: DateTime,
    not_after: DateTime,
    spki: SubjectPublicKeyInfo<'a>,
    extensions: Vec<Extension<'a>>,
) -> Result<TbsCertificate<'a>, Error> {
    Ok(TbsCertificate {
        version: Version::V3,
        serial_number: UIntRef::new(CERT_SERIAL)?,
        signature: AlgorithmIdentifier {
            oid: rsa::SHA256_PKCS1_SIGNATURE_OID,
            parameters: Some(der::AnyRef::NULL),
        },
        issuer: RdnSequence::from_der(issuer)?,
        validity: x509_cert::time::Validity {
            not_before: validity_time(not_before)?,
            not_after: validity_time(not_after)?,
        },
        subject: RdnSequence::from_der(subject)?,
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    })
}

fn validity_time(when: DateTime) -> Result<Time, Error> {
    let secs = u64::try_from(when.ms_since_epoch / 1000)
        .map_err(|_| Error::Der(ErrorKind::DateTime))?;
    validity_time_from_duration(Duration::from_secs(secs))
}

/// Construct x.509-cert::time::Time from Duration.
/// RFC 5280 section 4.1.2.5 requires that UtcTime is used up to 2049
/// and GeneralizedTime from 2050 onwards
fn validity_time_from_duration(duration: Duration) -> Result<Time, Error> {
    const MAX_UTC_TIME: Duration = Duration::from_secs(2524608000); // 2050-01-01T00:00:00Z
    if duration >= MAX_UTC_TIME {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(duration)?))
    }
}

pub(crate) fn asn1_der_encode<T: Encode>(obj: &T) -> Result<Vec<u8>, Error> {
    let mut encoded_data = Vec::<u8>::new();
    obj.encode_to_vec(&mut encoded_data)?;
    Ok(encoded_data)
}

fn sign_pkcs1_sha256(
    ctx: &KeymasterContext,
    key: &rsa::Key,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let mode = rsa::SignMode::Pkcs1_1_5Padding(Digest::Sha256);
    let mut op = ctx.with_rng(|rng| ctx.rsa.begin_sign(rng, key.clone(), mode))?;
    op.update(data)?;
    op.finish()
}

/// Key identifier for a subject public key: the leading bytes of its SHA-256 hash.
fn key_identifier(ctx: &KeymasterContext, subject_public_key: &[u8]) -> Result<Vec<u8>, Error> {
    let digest: [u8; SHA256_DIGEST_LEN] = ctx.sha256.hash(subject_public_key)?;
    Ok(try_to_vec(&digest[..KEY_ID_LEN])?)
}

/// Extract the subject key identifier of a certificate, if present.
fn subject_key_id(cert: &Certificate) -> Result<Option<Vec<u8>>, Error> {
    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions {
            if ext.extn_id == SUBJECT_KEY_IDENTIFIER_OID {
                let key_id = OctetStringRef::from_der(ext.extn_value)
                    .map_err(|e| km_err!(InvalidArgument, "malformed subject key ID: {:?}", e))?;
                return Ok(Some(try_to_vec(key_id.as_bytes())?));
            }
        }
    }
    Ok(None)
}

/// Build key usage extension bits.
pub(crate) fn key_usage_extension_bits(params: &[KeyParam]) -> KeyUsage {
    // Build `KeyUsage` bitmask based on allowed purposes for the key.
    let mut key_usage_bits = FlagSet::<KeyUsages>::default();
    for param in params {
        if let KeyParam::Purpose(purpose) = param {
            match purpose {
                KeyPurpose::Sign => {
                    key_usage_bits |= KeyUsages::DigitalSignature;
                }
                KeyPurpose::Decrypt => {
                    key_usage_bits |= KeyUsages::DataEncipherment;
                }
                KeyPurpose::WrapKey => {
                    key_usage_bits |= KeyUsages::KeyEncipherment;
                }
                KeyPurpose::Encrypt | KeyPurpose::Verify => {}
            }
        }
    }
    KeyUsage(key_usage_bits)
}

/// Build basic constraints extension value
pub(crate) fn basic_constraints_ext_value(ca_required: bool) -> BasicConstraints {
    BasicConstraints { ca: ca_required, path_len_constraint: None }
}

/// Authority key identifier extension value, holding only the key identifier.
///
/// ```asn1
/// AuthorityKeyIdentifier ::= SEQUENCE {
///     keyIdentifier             [0] KeyIdentifier           OPTIONAL,
///     authorityCertIssuer       [1] GeneralNames            OPTIONAL,
///     authorityCertSerialNumber [2] CertificateSerialNumber OPTIONAL  }
/// ```
#[derive(Debug, Clone, Sequence)]
struct AuthorityKeyIdentifier<'a> {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    key_identifier: Option<OctetStringRef<'a>>,
}

/// Attestation extension contents
///
/// ```asn1
/// KeyDescription ::= SEQUENCE {
///     attestationVersion         INTEGER, # Value 2
///     attestationSecurityLevel   SecurityLevel,
///     keymasterVersion           INTEGER, # Value 3
///     keymasterSecurityLevel     SecurityLevel,
///     attestationChallenge       OCTET_STRING, # Tag::ATTESTATION_CHALLENGE from attestParams
///     uniqueId                   OCTET_STRING, # Empty unless key has Tag::INCLUDE_UNIQUE_ID
///     softwareEnforced           AuthorizationList,
///     teeEnforced                AuthorizationList,
/// }
/// ```
#[derive(Debug, Clone, Sequence)]
pub(crate) struct KeyDescription<'a> {
    attestation_version: i32,
    attestation_security_level: SecurityLevel,
    keymaster_version: i32,
    keymaster_security_level: SecurityLevel,
    #[asn1(type = "OCTET STRING")]
    attestation_challenge: &'a [u8],
    #[asn1(type = "OCTET STRING")]
    unique_id: &'a [u8],
    software_enforced: AuthorizationList<'a>,
    tee_enforced: AuthorizationList<'a>,
}

impl<'a> AssociatedOid for KeyDescription<'a> {
    const OID: ObjectIdentifier = ATTESTATION_EXTENSION_OID;
}

/// Security level enumeration
/// ```asn1
/// SecurityLevel ::= ENUMERATED {
///     Software                   (0),
///     TrustedEnvironment         (1),
///     StrongBox                  (2),
/// }
/// ```
#[repr(u32)]
#[derive(Debug, Clone, Copy, Enumerated)]
enum SecurityLevel {
    Software = 0,
    TrustedEnvironment = 1,
    Strongbox = 2,
}

fn security_level(level: keymint::SecurityLevel) -> SecurityLevel {
    match level {
        keymint::SecurityLevel::Software => SecurityLevel::Software,
        keymint::SecurityLevel::TrustedEnvironment => SecurityLevel::TrustedEnvironment,
        keymint::SecurityLevel::Strongbox => SecurityLevel::Strongbox,
    }
}

/// Structure for creating ASN.1 DER-serialized `AuthorizationList`.
#[derive(Debug, Clone)]
struct AuthorizationList<'a> {
    auths: &'a [KeyParam],
    root_of_trust: Option<RootOfTrust<'a>>,
    app_id: Option<&'a [u8]>,
    device_ids: &'a [KeyParam],
}

/// Convert an error into a default `der::Error`.
#[inline]
fn der_err(_e: Error) -> der::Error {
    der::Error::new(der::ErrorKind::Failed, der::Length::ZERO)
}

/// Convert an error into a `der::Error` indicating allocation failure.
#[inline]
fn der_alloc_err<T>(_e: T) -> der::Error {
    der::Error::new(der::ErrorKind::Overlength, der::Length::ZERO)
}

/// Placeholder implementation of [`der::Decode`] which always fails. Needed to satisfy the
/// [`der::Sequence`] trait bound, but attestation records are never decoded here.
impl<'a> der::Decode<'a> for AuthorizationList<'a> {
    fn decode<R: der::Reader<'a>>(_decoder: &mut R) -> der::Result<Self> {
        Err(der::Error::new(der::ErrorKind::Failed, der::Length::ZERO))
    }
}

// Macros to extract key characteristics for ASN.1 encoding into one of the forms:
//   field    [<tag>] EXPLICIT SET OF INTEGER OPTIONAL
//   field    [<tag>] EXPLICIT INTEGER OPTIONAL
//   field    [<tag>] EXPLICIT NULL OPTIONAL
//   field    [<tag>] EXPLICIT OCTET STRING OPTIONAL
macro_rules! asn1_set_of_integer {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            let mut results = Vec::new();
            for param in $params {
                if let KeyParam::$variant(v) = param {
                    results.try_push(*v as i64).map_err(der_alloc_err)?;
                }
            }
            if !results.is_empty() {
                // SET OF elements must be added in DER order.
                results.sort_unstable();
                results.dedup();
                let mut set = der::asn1::SetOfVec::new();
                for val in results {
                    set.add(val)?;
                }
                $contents.try_push(Box::new(ExplicitTaggedValue {
                    tag: raw_tag_value(Tag::$variant),
                    val: set,
                })).map_err(der_alloc_err)?;
            }
        }
    }
}
macro_rules! asn1_integer {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            if let Some(val) = get_opt_tag_value!($params, $variant).map_err(der_err)? {
                    $contents.try_push(Box::new(ExplicitTaggedValue {
                        tag: raw_tag_value(Tag::$variant),
                        val: *val as i64
                    })).map_err(der_alloc_err)?;
            }
        }
    }
}
macro_rules! asn1_integer_newtype {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            if let Some(val) = get_opt_tag_value!($params, $variant).map_err(der_err)? {
                    $contents.try_push(Box::new(ExplicitTaggedValue {
                        tag: raw_tag_value(Tag::$variant),
                        val: val.0 as i64
                    })).map_err(der_alloc_err)?;
            }
        }
    }
}
macro_rules! asn1_integer_datetime {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            if let Some(val) = get_opt_tag_value!($params, $variant).map_err(der_err)? {
                    $contents.try_push(Box::new(ExplicitTaggedValue {
                        tag: raw_tag_value(Tag::$variant),
                        val: val.ms_since_epoch
                    })).map_err(der_alloc_err)?;
            }
        }
    }
}
macro_rules! asn1_null {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            if get_bool_tag_value!($params, $variant).map_err(der_err)? {
                    $contents.try_push(Box::new(ExplicitTaggedValue {
                        tag: raw_tag_value(Tag::$variant),
                        val: ()
                    })).map_err(der_alloc_err)?;
            }
        }
    }
}
macro_rules! asn1_octet_string {
    {
        $contents:ident, $params:expr, $variant:ident
    } => {
        {
            if let Some(val) = get_opt_tag_value!($params, $variant).map_err(der_err)? {
                    $contents.try_push(Box::new(ExplicitTaggedValue {
                        tag: raw_tag_value(Tag::$variant),
                        val: OctetStringRef::new(val)?,
                    })).map_err(der_alloc_err)?;
            }
        }
    }
}

impl<'a> Sequence<'a> for AuthorizationList<'a> {
    /// ```asn1
    /// AuthorizationList ::= SEQUENCE {
    ///     purpose                    [1] EXPLICIT SET OF INTEGER OPTIONAL,
    ///     algorithm                  [2] EXPLICIT INTEGER OPTIONAL,
    ///     keySize                    [3] EXPLICIT INTEGER OPTIONAL,
    ///     digest                     [5] EXPLICIT SET OF INTEGER OPTIONAL,
    ///     padding                    [6] EXPLICIT SET OF INTEGER OPTIONAL,
    ///     ecCurve                    [10] EXPLICIT INTEGER OPTIONAL,
    ///     rsaPublicExponent          [200] EXPLICIT INTEGER OPTIONAL,
    ///     activeDateTime             [400] EXPLICIT INTEGER OPTIONAL,
    ///     originationExpireDateTime  [401] EXPLICIT INTEGER OPTIONAL,
    ///     usageExpireDateTime        [402] EXPLICIT INTEGER OPTIONAL,
    ///     noAuthRequired             [503] EXPLICIT NULL OPTIONAL,
    ///     userAuthType               [504] EXPLICIT INTEGER OPTIONAL,
    ///     authTimeout                [505] EXPLICIT INTEGER OPTIONAL,
    ///     allowWhileOnBody           [506] EXPLICIT NULL OPTIONAL,
    ///     allApplications            [600] EXPLICIT NULL OPTIONAL,
    ///     creationDateTime           [701] EXPLICIT INTEGER OPTIONAL,
    ///     origin                     [702] EXPLICIT INTEGER OPTIONAL,
    ///     rootOfTrust                [704] EXPLICIT RootOfTrust OPTIONAL,
    ///     osVersion                  [705] EXPLICIT INTEGER OPTIONAL,
    ///     osPatchLevel               [706] EXPLICIT INTEGER OPTIONAL,
    ///     attestationApplicationId   [709] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdBrand         [710] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdDevice        [711] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdProduct       [712] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdSerial        [713] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdImei          [714] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdMeid          [715] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdManufacturer  [716] EXPLICIT OCTET_STRING OPTIONAL,
    ///     attestationIdModel         [717] EXPLICIT OCTET_STRING OPTIONAL,
    /// }
    /// ```
    fn fields<F, T>(&self, f: F) -> der::Result<T>
    where
        F: FnOnce(&[&dyn Encode]) -> der::Result<T>,
    {
        let mut contents = Vec::<Box<dyn Encode>>::new();

        asn1_set_of_integer!(contents, self.auths, Purpose);
        asn1_integer!(contents, self.auths, Algorithm);
        asn1_integer_newtype!(contents, self.auths, KeySize);
        asn1_set_of_integer!(contents, self.auths, Digest);
        asn1_set_of_integer!(contents, self.auths, Padding);
        asn1_integer!(contents, self.auths, EcCurve);
        asn1_integer_newtype!(contents, self.auths, RsaPublicExponent);
        asn1_integer_datetime!(contents, self.auths, ActiveDatetime);
        asn1_integer_datetime!(contents, self.auths, OriginationExpireDatetime);
        asn1_integer_datetime!(contents, self.auths, UsageExpireDatetime);
        asn1_null!(contents, self.auths, NoAuthRequired);
        asn1_integer!(contents, self.auths, UserAuthType);
        asn1_integer!(contents, self.auths, AuthTimeout);
        asn1_null!(contents, self.auths, AllowWhileOnBody);
        asn1_null!(contents, self.auths, AllApplications);
        asn1_integer_datetime!(contents, self.auths, CreationDatetime);
        asn1_integer!(contents, self.auths, Origin);
        // Root of trust comes from the boot state, not from key characteristics.
        if let Some(rot) = &self.root_of_trust {
            contents
                .try_push(Box::new(ExplicitTaggedValue {
                    tag: raw_tag_value(Tag::RootOfTrust),
                    val: rot.clone(),
                }))
                .map_err(der_alloc_err)?;
        }
        asn1_integer!(contents, self.auths, OsVersion);
        asn1_integer!(contents, self.auths, OsPatchlevel);
        if let Some(app_id) = self.app_id {
            contents
                .try_push(Box::new(ExplicitTaggedValue {
                    tag: raw_tag_value(Tag::AttestationApplicationId),
                    val: OctetStringRef::new(app_id)?,
                }))
                .map_err(der_alloc_err)?;
        }
        // Accuracy of attestation IDs has already been checked, so just copy across.
        asn1_octet_string!(contents, self.device_ids, AttestationIdBrand);
        asn1_octet_string!(contents, self.device_ids, AttestationIdDevice);
        asn1_octet_string!(contents, self.device_ids, AttestationIdProduct);
        asn1_octet_string!(contents, self.device_ids, AttestationIdSerial);
        asn1_octet_string!(contents, self.device_ids, AttestationIdImei);
        asn1_octet_string!(contents, self.device_ids, AttestationIdMeid);
        asn1_octet_string!(contents, self.device_ids, AttestationIdManufacturer);
        asn1_octet_string!(contents, self.device_ids, AttestationIdModel);

        let ref_contents: Vec<&dyn Encode> = contents.iter().map(|v| v.as_ref()).collect();
        f(&ref_contents)
    }
}

struct ExplicitTaggedValue<T: Encode> {
    pub tag: u32,
    pub val: T,
}

impl<T: Encode> ExplicitTaggedValue<T> {
    fn explicit_tag_len(&self) -> der::Result<der::Length> {
        match self.tag {
            0..=0x1e => Ok(der::Length::ONE),
            0x1f..=0x7f => Ok(der::Length::new(2)),
            0x80..=0x3fff => Ok(der::Length::new(3)),
            _ => Err(der::ErrorKind::Overflow.into()),
        }
    }

    fn explicit_tag_encode(&self, encoder: &mut dyn der::Writer) -> der::Result<()> {
        match self.tag {
            0..=0x1e => {
                // b101vvvvv is context-specific+constructed
                encoder.write_byte(0b10100000u8 | (self.tag as u8))
            }
            0x1f..=0x7f => {
                // b101 11111 indicates a context-specific+constructed long-form tag number
                encoder.write_byte(0b10111111)?;
                encoder.write_byte(self.tag as u8)
            }
            0x80..=0x3fff => {
                // b101 11111 indicates a context-specific+constructed long-form tag number
                encoder.write_byte(0b10111111)?;
                encoder.write_byte((self.tag >> 7) as u8 | 0x80u8)?;
                encoder.write_byte((self.tag & 0x007f) as u8)
            }
            _ => Err(der::ErrorKind::Overflow.into()),
        }
    }
}

/// The der library explicitly does not support `TagNumber` values bigger than 31,
/// which are required here.  Work around this by manually providing the encoding functionality.
impl<T: Encode> Encode for ExplicitTaggedValue<T> {
    fn encoded_len(&self) -> der::Result<der::Length> {
        let inner_len = self.val.encoded_len()?;
        self.explicit_tag_len() + inner_len.encoded_len()? + inner_len
    }

    fn encode(&self, encoder: &mut dyn der::Writer) -> der::Result<()> {
        let inner_len = self.val.encoded_len()?;
        self.explicit_tag_encode(encoder)?;
        inner_len.encode(encoder)?;
        self.val.encode(encoder)
    }
}

/// Root of Trust ASN.1 structure
/// ```asn1
/// RootOfTrust ::= SEQUENCE {
///     verifiedBootKey            OCTET_STRING,
///     deviceLocked               BOOLEAN,
///     verifiedBootState          VerifiedBootState,
/// }
/// ```
#[derive(Debug, Clone, Sequence)]
struct RootOfTrust<'a> {
    #[asn1(type = "OCTET STRING")]
    verified_boot_key: &'a [u8],
    device_locked: bool,
    verified_boot_state: VerifiedBootState,
}

/// Verified Boot State as ASN.1 ENUMERATED type.
///```asn1
/// VerifiedBootState ::= ENUMERATED {
///     Verified                   (0),
///     SelfSigned                 (1),
///     Unverified                 (2),
///     Failed                     (3),
/// }
///```
#[repr(u32)]
#[derive(Debug, Clone, Copy, Enumerated)]
enum VerifiedBootState {
    Verified = 0,
    SelfSigned = 1,
    Unverified = 2,
    Failed = 3,
}

impl From<keymint::VerifiedBootState> for VerifiedBootState {
    fn from(state: keymint::VerifiedBootState) -> VerifiedBootState {
        match state {
            keymint::VerifiedBootState::Verified => VerifiedBootState::Verified,
            keymint::VerifiedBootState::SelfSigned => VerifiedBootState::SelfSigned,
            keymint::VerifiedBootState::Unverified => VerifiedBootState::Unverified,
            keymint::VerifiedBootState::Failed => VerifiedBootState::Failed,
        }
    }
}
