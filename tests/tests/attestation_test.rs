// Integration test.

// Explicitly include alloc because macros from `skm_common` assume it.
extern crate alloc;

use der::{asn1::ObjectIdentifier, Decode, Encode};
use skm_common::expect_err;
use skm_common::wire::keymint::{
    Algorithm, BlockMode, Digest, KeyFormat, KeyParam, KeyPurpose, PaddingMode,
    DEFAULT_CERT_SUBJECT,
};
use skm_common::wire::{KeySizeInBits, RsaExponent};
use skm_ta::{config::AttestationIds, KeyCreationResult, KeymasterConfig, SoftKeymaster};
use x509_cert::Certificate;

const ATTESTATION_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.1.17");

fn keymaster(config: KeymasterConfig) -> SoftKeymaster {
    let _ = env_logger::builder().is_test(true).try_init();
    SoftKeymaster::new(config, skm_crypto_rust::implementation().unwrap()).unwrap()
}

fn rsa_key(km: &mut SoftKeymaster, extra: &[KeyParam]) -> KeyCreationResult {
    let mut params = vec![
        KeyParam::Algorithm(Algorithm::Rsa),
        KeyParam::KeySize(KeySizeInBits(2048)),
        KeyParam::RsaPublicExponent(RsaExponent(65537)),
        KeyParam::Purpose(KeyPurpose::Sign),
        KeyParam::Purpose(KeyPurpose::Verify),
        KeyParam::Digest(Digest::Sha256),
        KeyParam::Padding(PaddingMode::RsaPkcs115Sign),
        KeyParam::NoAuthRequired,
    ];
    params.extend_from_slice(extra);
    km.generate_key(&params).unwrap()
}

fn attest_params(extra: &[KeyParam]) -> Vec<KeyParam> {
    let mut params = vec![
        KeyParam::AttestationChallenge(b"challenge-123".as_slice().to_vec()),
        KeyParam::AttestationApplicationId(b"com.example.app".as_slice().to_vec()),
    ];
    params.extend_from_slice(extra);
    params
}

fn attestation_record(cert: &Certificate) -> Vec<u8> {
    let exts = cert.tbs_certificate.extensions.as_ref().expect("no extensions");
    let ext = exts.iter().find(|e| e.extn_id == ATTESTATION_OID).expect("no attestation");
    assert!(!ext.critical);
    ext.extn_value.to_vec()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn test_attest_rsa_key() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = rsa_key(&mut km, &[]);
    let chain = km.attest_key(&key.key_blob, &attest_params(&[])).unwrap();
    assert_eq!(chain.len(), 2);

    let leaf = Certificate::from_der(&chain[0]).unwrap();
    let batch = Certificate::from_der(&chain[1]).unwrap();
    assert_eq!(
        leaf.tbs_certificate.issuer.to_vec().unwrap(),
        batch.tbs_certificate.subject.to_vec().unwrap()
    );
    assert_eq!(leaf.tbs_certificate.subject.to_vec().unwrap(), DEFAULT_CERT_SUBJECT);

    // sha256WithRSAEncryption carries explicit NULL parameters, in both certificates.
    for cert in [&leaf, &batch] {
        for alg in [&cert.signature_algorithm, &cert.tbs_certificate.signature] {
            let params = alg.parameters.expect("no signature parameters");
            assert_eq!(params.to_vec().unwrap(), [0x05, 0x00]);
        }
    }

    // The leaf certifies the attested key.
    let spki = km.export_key(KeyFormat::X509, &key.key_blob, &[]).unwrap();
    assert_eq!(leaf.tbs_certificate.subject_public_key_info.to_vec().unwrap(), spki);

    let record = attestation_record(&leaf);
    assert!(contains(&record, b"challenge-123"));
    assert!(contains(&record, b"com.example.app"));
    // attestationVersion 2, then keymasterVersion 3 after the security level.
    assert!(contains(&record, &[0x02, 0x01, 0x02, 0x0a, 0x01]));
    assert!(contains(&record, &[0x02, 0x01, 0x03, 0x0a, 0x01]));

    // The batch certificate is reused across attestations.
    let other = rsa_key(&mut km, &[]);
    let chain2 = km.attest_key(&other.key_blob, &attest_params(&[])).unwrap();
    assert_eq!(chain2[1], chain[1]);
    assert_ne!(chain2[0], chain[0]);
}

#[test]
fn test_attest_errors() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = rsa_key(&mut km, &[]);

    let result = km.attest_key(
        &key.key_blob,
        &[KeyParam::AttestationApplicationId(b"com.example.app".as_slice().to_vec())],
    );
    expect_err!(result, "AttestationChallengeMissing");

    let result =
        km.attest_key(&key.key_blob, &[KeyParam::AttestationChallenge(b"challenge".as_slice().to_vec())]);
    expect_err!(result, "AttestationApplicationIdMissing");

    let long = [
        KeyParam::AttestationChallenge(vec![0x11; 129]),
        KeyParam::AttestationApplicationId(b"com.example.app".as_slice().to_vec()),
    ];
    let result = km.attest_key(&key.key_blob, &long);
    expect_err!(result, "InvalidInputLength");

    let aes = km
        .generate_key(&[
            KeyParam::Algorithm(Algorithm::Aes),
            KeyParam::KeySize(KeySizeInBits(128)),
            KeyParam::Purpose(KeyPurpose::Encrypt),
            KeyParam::BlockMode(BlockMode::Ecb),
            KeyParam::Padding(PaddingMode::None),
        ])
        .unwrap();
    let result = km.attest_key(&aes.key_blob, &attest_params(&[]));
    expect_err!(result, "IncompatibleAlgorithm");

    // Device IDs cannot be attested unless provisioned.
    let result = km.attest_key(
        &key.key_blob,
        &attest_params(&[KeyParam::AttestationIdBrand(b"generic".as_slice().to_vec())]),
    );
    expect_err!(result, "CannotAttestIds");
}

#[test]
fn test_attest_device_ids() {
    let config = KeymasterConfig {
        supports_device_id_attestation: true,
        attestation_ids: Some(AttestationIds {
            brand: "generic".into(),
            model: "soft-keymaster".into(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut km = keymaster(config);
    let key = rsa_key(&mut km, &[]);

    let chain = km
        .attest_key(
            &key.key_blob,
            &attest_params(&[
                KeyParam::AttestationIdBrand(b"generic".as_slice().to_vec()),
                KeyParam::AttestationIdModel(b"soft-keymaster".as_slice().to_vec()),
            ]),
        )
        .unwrap();
    let record = attestation_record(&Certificate::from_der(&chain[0]).unwrap());
    assert!(contains(&record, b"generic"));
    assert!(contains(&record, b"soft-keymaster"));

    let result = km.attest_key(
        &key.key_blob,
        &attest_params(&[KeyParam::AttestationIdBrand(b"other".as_slice().to_vec())]),
    );
    expect_err!(result, "CannotAttestIds");
}

#[test]
fn test_attest_unique_id() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = rsa_key(&mut km, &[KeyParam::IncludeUniqueId]);

    let record_for = |km: &SoftKeymaster, extra: &[KeyParam]| {
        let chain = km.attest_key(&key.key_blob, &attest_params(extra)).unwrap();
        attestation_record(&Certificate::from_der(&chain[0]).unwrap())
    };
    let first = record_for(&km, &[]);
    // 16-byte unique ID after the challenge.
    let mut marker = vec![0x04, 13];
    marker.extend_from_slice(b"challenge-123");
    marker.extend_from_slice(&[0x04, 16]);
    assert!(contains(&first, &marker));

    let again = record_for(&km, &[]);
    let reset = record_for(&km, &[KeyParam::ResetSinceIdRotation]);
    let pos = |r: &[u8]| r.windows(marker.len()).position(|w| w == marker.as_slice()).unwrap();
    let id = |r: &[u8]| {
        let start = pos(r) + marker.len();
        r[start..start + 16].to_vec()
    };
    assert_eq!(id(&first), id(&again));
    assert_ne!(id(&first), id(&reset));
}
