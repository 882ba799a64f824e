// Integration test.

// Explicitly include alloc because macros from `skm_common` assume it.
extern crate alloc;

use skm_common::expect_err;
use skm_common::wire::keymint::{
    Algorithm, BlockMode, DateTime, Digest, ErrorCode, KeyFormat, KeyOrigin, KeyParam,
    KeyPurpose, PaddingMode, Tag,
};
use skm_common::wire::{KeySizeInBits, RsaExponent};
use skm_ta::{config::BlobFormat, BeginResult, KeymasterConfig, SoftKeymaster};

fn keymaster(config: KeymasterConfig) -> SoftKeymaster {
    let _ = env_logger::builder().is_test(true).try_init();
    SoftKeymaster::new(config, skm_crypto_rust::implementation().unwrap()).unwrap()
}

fn aes_gcm_key_params(extra: &[KeyParam]) -> Vec<KeyParam> {
    let mut params = vec![
        KeyParam::Algorithm(Algorithm::Aes),
        KeyParam::KeySize(KeySizeInBits(256)),
        KeyParam::Purpose(KeyPurpose::Encrypt),
        KeyParam::Purpose(KeyPurpose::Decrypt),
        KeyParam::BlockMode(BlockMode::Gcm),
        KeyParam::Padding(PaddingMode::None),
        KeyParam::MinMacLength(128),
        KeyParam::NoAuthRequired,
    ];
    params.extend_from_slice(extra);
    params
}

fn gcm_params(extra: &[KeyParam]) -> Vec<KeyParam> {
    let mut params = vec![
        KeyParam::BlockMode(BlockMode::Gcm),
        KeyParam::Padding(PaddingMode::None),
        KeyParam::MacLength(128),
    ];
    params.extend_from_slice(extra);
    params
}

fn rsa_sign_key_params() -> Vec<KeyParam> {
    vec![
        KeyParam::Algorithm(Algorithm::Rsa),
        KeyParam::KeySize(KeySizeInBits(2048)),
        KeyParam::RsaPublicExponent(RsaExponent(65537)),
        KeyParam::Purpose(KeyPurpose::Sign),
        KeyParam::Purpose(KeyPurpose::Verify),
        KeyParam::Digest(Digest::Sha256),
        KeyParam::Padding(PaddingMode::RsaPkcs115Sign),
        KeyParam::NoAuthRequired,
    ]
}

fn returned_nonce(begin: &BeginResult) -> Vec<u8> {
    begin
        .params
        .iter()
        .find_map(|p| if let KeyParam::Nonce(n) = p { Some(n.clone()) } else { None })
        .expect("no nonce returned")
}

#[test]
fn test_aes_gcm_roundtrip() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
    assert!(key.characteristics.hw_enforced.contains(&KeyParam::Origin(KeyOrigin::Generated)));

    let enc = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[])).unwrap();
    let nonce = returned_nonce(&enc);
    assert_eq!(nonce.len(), 12);
    km.update_aad(enc.op_handle, b"hdr").unwrap();
    let ciphertext = km.finish(enc.op_handle, &[], b"hello", None).unwrap();
    assert_eq!(ciphertext.len(), 5 + 16);

    let dec_params = gcm_params(&[KeyParam::Nonce(nonce.clone())]);
    let dec = km.begin(KeyPurpose::Decrypt, &key.key_blob, &dec_params).unwrap();
    km.update_aad(dec.op_handle, b"hdr").unwrap();
    let plaintext = km.finish(dec.op_handle, &[], &ciphertext, None).unwrap();
    assert_eq!(plaintext, b"hello");

    let dec = km.begin(KeyPurpose::Decrypt, &key.key_blob, &dec_params).unwrap();
    km.update_aad(dec.op_handle, b"hdx").unwrap();
    let result = km.finish(dec.op_handle, &[], &ciphertext, None);
    expect_err!(result, "VerificationFailed");

    // Decryption without the nonce cannot start.
    let result = km.begin(KeyPurpose::Decrypt, &key.key_blob, &gcm_params(&[]));
    assert!(result.is_err());
}

#[test]
fn test_aes_gcm_aad_split() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km.generate_key(&aes_gcm_key_params(&[KeyParam::CallerNonce])).unwrap();
    let params = gcm_params(&[KeyParam::Nonce(vec![7; 12])]);

    // Whole associated data, supplied at begin.
    let mut begin_params = params.clone();
    begin_params.push(KeyParam::AssociatedData(b"header-bytes".to_vec()));
    let op = km.begin(KeyPurpose::Encrypt, &key.key_blob, &begin_params).unwrap();
    // A caller-provided nonce is echoed back.
    assert_eq!(returned_nonce(&op), vec![7; 12]);
    let want = km.finish(op.op_handle, &[], b"payload", None).unwrap();

    // Split across update_aad and update parameters.
    let op = km.begin(KeyPurpose::Encrypt, &key.key_blob, &params).unwrap();
    km.update_aad(op.op_handle, b"head").unwrap();
    let aad_only = km
        .update(op.op_handle, &[KeyParam::AssociatedData(b"er-by".to_vec())], &[])
        .unwrap();
    assert_eq!(aad_only.input_consumed, 0);
    assert!(aad_only.output.is_empty());
    let part = km
        .update(op.op_handle, &[KeyParam::AssociatedData(b"tes".to_vec())], b"pay")
        .unwrap();
    assert_eq!(part.input_consumed, 3);
    let mut got = part.output;
    got.extend_from_slice(&km.finish(op.op_handle, &[], b"load", None).unwrap());
    assert_eq!(got, want);

    // No more associated data once data has been processed.
    let op = km.begin(KeyPurpose::Encrypt, &key.key_blob, &params).unwrap();
    km.update(op.op_handle, &[], b"pay").unwrap();
    let result = km.update_aad(op.op_handle, b"late");
    expect_err!(result, "InvalidTag");
}

#[test]
fn test_rsa_sign_verify() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km.generate_key(&rsa_sign_key_params()).unwrap();
    let params = [KeyParam::Digest(Digest::Sha256), KeyParam::Padding(PaddingMode::RsaPkcs115Sign)];

    let op = km.begin(KeyPurpose::Sign, &key.key_blob, &params).unwrap();
    let sig = km.finish(op.op_handle, &[], b"msg", None).unwrap();
    assert_eq!(sig.len(), 256);

    let op = km.begin(KeyPurpose::Verify, &key.key_blob, &params).unwrap();
    assert!(km.finish(op.op_handle, &[], b"msg", Some(&sig)).is_ok());

    let op = km.begin(KeyPurpose::Verify, &key.key_blob, &params).unwrap();
    let result = km.finish(op.op_handle, &[], b"msg2", Some(&sig));
    expect_err!(result, "VerificationFailed");

    // Unauthorized digest.
    let result = km.begin(
        KeyPurpose::Sign,
        &key.key_blob,
        &[KeyParam::Digest(Digest::Sha512), KeyParam::Padding(PaddingMode::RsaPkcs115Sign)],
    );
    assert!(result.is_err());
}

#[test]
fn test_rsa_oaep_encrypt_decrypt() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km
        .generate_key(&[
            KeyParam::Algorithm(Algorithm::Rsa),
            KeyParam::KeySize(KeySizeInBits(2048)),
            KeyParam::RsaPublicExponent(RsaExponent(65537)),
            KeyParam::Purpose(KeyPurpose::Encrypt),
            KeyParam::Purpose(KeyPurpose::Decrypt),
            KeyParam::Digest(Digest::Sha256),
            KeyParam::Padding(PaddingMode::RsaOaep),
            KeyParam::NoAuthRequired,
        ])
        .unwrap();
    let params = [KeyParam::Digest(Digest::Sha256), KeyParam::Padding(PaddingMode::RsaOaep)];

    let op = km.begin(KeyPurpose::Encrypt, &key.key_blob, &params).unwrap();
    let ciphertext = km.finish(op.op_handle, &[], b"secret", None).unwrap();
    assert_eq!(ciphertext.len(), 256);

    let op = km.begin(KeyPurpose::Decrypt, &key.key_blob, &params).unwrap();
    let plaintext = km.finish(op.op_handle, &[], &ciphertext, None).unwrap();
    assert_eq!(plaintext, b"secret");
}

#[test]
fn test_hmac_mac_length() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km
        .generate_key(&[
            KeyParam::Algorithm(Algorithm::Hmac),
            KeyParam::KeySize(KeySizeInBits(256)),
            KeyParam::Purpose(KeyPurpose::Sign),
            KeyParam::Purpose(KeyPurpose::Verify),
            KeyParam::Digest(Digest::Sha256),
            KeyParam::MinMacLength(128),
            KeyParam::NoAuthRequired,
        ])
        .unwrap();

    // Below the key's minimum.
    let result = km.begin(KeyPurpose::Sign, &key.key_blob, &[KeyParam::MacLength(96)]);
    expect_err!(result, "InvalidMacLength");
    // Longer than the digest.
    let result = km.begin(KeyPurpose::Sign, &key.key_blob, &[KeyParam::MacLength(264)]);
    expect_err!(result, "UnsupportedMacLength");
    // No length at all.
    let result = km.begin(KeyPurpose::Sign, &key.key_blob, &[]);
    expect_err!(result, "MissingMacLength");

    let op = km.begin(KeyPurpose::Sign, &key.key_blob, &[KeyParam::MacLength(160)]).unwrap();
    let tag = km.finish(op.op_handle, &[], b"data", None).unwrap();
    assert_eq!(tag.len(), 20);

    let op = km.begin(KeyPurpose::Verify, &key.key_blob, &[]).unwrap();
    assert!(km.finish(op.op_handle, &[], b"data", Some(&tag)).is_ok());

    // Truncated below the minimum.
    let op = km.begin(KeyPurpose::Verify, &key.key_blob, &[]).unwrap();
    let result = km.finish(op.op_handle, &[], b"data", Some(&tag[..12]));
    expect_err!(result, "InvalidMacLength");

    let op = km.begin(KeyPurpose::Verify, &key.key_blob, &[]).unwrap();
    let result = km.finish(op.op_handle, &[], b"datb", Some(&tag));
    expect_err!(result, "VerificationFailed");

    // Key creation rejects a minimum below 64 bits.
    let result = km.generate_key(&[
        KeyParam::Algorithm(Algorithm::Hmac),
        KeyParam::KeySize(KeySizeInBits(256)),
        KeyParam::Purpose(KeyPurpose::Sign),
        KeyParam::Digest(Digest::Sha256),
        KeyParam::MinMacLength(56),
    ]);
    expect_err!(result, "UnsupportedMinMacLength");
}

#[test]
fn test_blob_tamper() {
    for format in [BlobFormat::AuthEncrypted, BlobFormat::IntegrityAssured] {
        let config = KeymasterConfig { blob_format: format, ..Default::default() };
        let mut km = keymaster(config);
        let key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
        let version = match format {
            BlobFormat::AuthEncrypted => 0,
            BlobFormat::IntegrityAssured => 1,
        };
        assert_eq!(key.key_blob[0], version);

        let chars = km.get_key_characteristics(&key.key_blob, &[]).unwrap();
        assert_eq!(chars, key.characteristics);

        // Every single-bit change is detected.
        for idx in 0..key.key_blob.len() {
            for bit in 0..8 {
                let mut tampered = key.key_blob.clone();
                tampered[idx] ^= 1 << bit;
                let result = km.get_key_characteristics(&tampered, &[]);
                assert_eq!(
                    result.err().map(|e| e.code()),
                    Some(ErrorCode::InvalidKeyBlob),
                    "{:?} blob with byte {} bit {} flipped",
                    format,
                    idx,
                    bit
                );
            }
        }
        let result = km.get_key_characteristics(&key.key_blob[..key.key_blob.len() - 1], &[]);
        expect_err!(result, "InvalidKeyBlob");
        let result = km.get_key_characteristics(&[], &[]);
        expect_err!(result, "InvalidKeyBlob");
    }
}

#[test]
fn test_application_id_binding() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km
        .generate_key(&aes_gcm_key_params(&[KeyParam::ApplicationId(b"com.example".to_vec())]))
        .unwrap();
    assert!(!key.characteristics.hw_enforced.contains_tag(Tag::ApplicationId));
    assert!(!key.characteristics.sw_enforced.contains_tag(Tag::ApplicationId));

    let result = km.get_key_characteristics(&key.key_blob, &[]);
    expect_err!(result, "InvalidKeyBlob");
    let result = km.get_key_characteristics(
        &key.key_blob,
        &[KeyParam::ApplicationId(b"com.other".to_vec())],
    );
    expect_err!(result, "InvalidKeyBlob");
    assert!(km
        .get_key_characteristics(&key.key_blob, &[KeyParam::ApplicationId(b"com.example".to_vec())])
        .is_ok());
}

#[test]
fn test_version_binding_and_upgrade() {
    let config = KeymasterConfig { os_version: 110000, os_patchlevel: 202310, ..Default::default() };
    let mut km = keymaster(config);
    let key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
    assert!(key.characteristics.sw_enforced.contains(&KeyParam::OsPatchlevel(202310)));

    km.configure(110000, 202312).unwrap();
    let result = km.get_key_characteristics(&key.key_blob, &[]);
    expect_err!(result, "KeyRequiresUpgrade");
    let result = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[]));
    expect_err!(result, "KeyRequiresUpgrade");

    let upgraded = km.upgrade_key(&key.key_blob, &[]).unwrap();
    let chars = km.get_key_characteristics(&upgraded, &[]).unwrap();
    assert!(chars.sw_enforced.contains(&KeyParam::OsPatchlevel(202312)));
    assert!(!chars.sw_enforced.contains(&KeyParam::OsPatchlevel(202310)));
    assert!(km.begin(KeyPurpose::Encrypt, &upgraded, &gcm_params(&[])).is_ok());

    km.configure(110000, 202301).unwrap();
    let result = km.get_key_characteristics(&upgraded, &[]);
    expect_err!(result, "InvalidKeyBlob");
}

#[test]
fn test_export_key() {
    let mut km = keymaster(KeymasterConfig::default());
    let rsa_key = km.generate_key(&rsa_sign_key_params()).unwrap();
    let spki = km.export_key(KeyFormat::X509, &rsa_key.key_blob, &[]).unwrap();
    assert_eq!(spki[0], 0x30);
    let result = km.export_key(KeyFormat::Pkcs8, &rsa_key.key_blob, &[]);
    expect_err!(result, "UnsupportedKeyFormat");

    let aes_key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
    let result = km.export_key(KeyFormat::X509, &aes_key.key_blob, &[]);
    expect_err!(result, "UnsupportedKeyFormat");
    let result = km.export_key(KeyFormat::Raw, &aes_key.key_blob, &[]);
    expect_err!(result, "UnsupportedKeyFormat");
}

#[test]
fn test_import_key() {
    let mut km = keymaster(KeymasterConfig::default());
    let params = aes_gcm_key_params(&[KeyParam::CallerNonce]);
    let key = km.import_key(&params, KeyFormat::Raw, &[0x11; 32]).unwrap();
    assert!(key.characteristics.hw_enforced.contains(&KeyParam::Origin(KeyOrigin::Imported)));

    let result = km.import_key(&params, KeyFormat::Pkcs8, &[0x11; 32]);
    expect_err!(result, "UnsupportedKeyFormat");
    // Key size in the parameters must match the key material.
    let result = km.import_key(&params, KeyFormat::Raw, &[0x11; 16]);
    assert!(result.is_err());
}

#[test]
fn test_queries() {
    let mut km = keymaster(KeymasterConfig::default());
    assert_eq!(km.get_version(), (2, 1, 0));

    let algorithms = km.supported_algorithms();
    assert!(algorithms.contains(&Algorithm::Aes));
    assert!(algorithms.contains(&Algorithm::Hmac));
    assert!(algorithms.contains(&Algorithm::Rsa));
    assert!(!algorithms.contains(&Algorithm::Ec));

    let modes = km.supported_block_modes(Algorithm::Aes, KeyPurpose::Encrypt).unwrap();
    assert!(modes.contains(&BlockMode::Gcm));
    assert!(modes.contains(&BlockMode::Ecb));
    let paddings = km.supported_padding_modes(Algorithm::Rsa, KeyPurpose::Sign).unwrap();
    assert!(paddings.contains(&PaddingMode::RsaPss));
    assert!(!paddings.contains(&PaddingMode::RsaOaep));
    let paddings = km.supported_padding_modes(Algorithm::Rsa, KeyPurpose::Decrypt).unwrap();
    assert!(paddings.contains(&PaddingMode::RsaOaep));
    let digests = km.supported_digests(Algorithm::Hmac, KeyPurpose::Sign).unwrap();
    assert!(digests.contains(&Digest::Sha256));
    assert!(!digests.contains(&Digest::None));

    assert_eq!(km.supported_import_formats(Algorithm::Rsa).unwrap(), vec![KeyFormat::Pkcs8]);
    assert_eq!(km.supported_import_formats(Algorithm::Aes).unwrap(), vec![KeyFormat::Raw]);
    assert_eq!(km.supported_export_formats(Algorithm::Rsa).unwrap(), vec![KeyFormat::X509]);
    assert!(km.supported_export_formats(Algorithm::Hmac).unwrap().is_empty());

    let result = km.supported_block_modes(Algorithm::Ec, KeyPurpose::Sign);
    expect_err!(result, "UnsupportedAlgorithm");
    let result = km.supported_digests(Algorithm::Aes, KeyPurpose::Sign);
    expect_err!(result, "UnsupportedPurpose");

    let result = km.generate_key(&[
        KeyParam::Algorithm(Algorithm::Ec),
        KeyParam::KeySize(KeySizeInBits(256)),
        KeyParam::Purpose(KeyPurpose::Sign),
    ]);
    expect_err!(result, "UnsupportedAlgorithm");
}

#[test]
fn test_add_rng_entropy() {
    let mut km = keymaster(KeymasterConfig::default());
    assert!(km.add_rng_entropy(&[]).is_ok());
    assert!(km.add_rng_entropy(&[0xab; 2048]).is_ok());
    let result = km.add_rng_entropy(&[0xab; 2049]);
    expect_err!(result, "InvalidInputLength");
}

#[test]
fn test_delete_is_noop() {
    let mut km = keymaster(KeymasterConfig::default());
    let key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
    km.delete_key(&key.key_blob).unwrap();
    km.delete_all_keys().unwrap();
    assert!(km.get_key_characteristics(&key.key_blob, &[]).is_ok());
}

#[test]
fn test_enforcement() {
    let mut km = keymaster(KeymasterConfig::default());
    let far_future = DateTime { ms_since_epoch: 32_503_680_000_000 }; // 3000-01-01
    let key = km
        .generate_key(&aes_gcm_key_params(&[KeyParam::ActiveDatetime(far_future)]))
        .unwrap();
    let result = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[]));
    expect_err!(result, "KeyNotYetValid");

    let past = DateTime { ms_since_epoch: 1_000 };
    let key = km
        .generate_key(&aes_gcm_key_params(&[KeyParam::OriginationExpireDatetime(past)]))
        .unwrap();
    let result = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[]));
    expect_err!(result, "KeyExpired");

    let key = km.generate_key(&aes_gcm_key_params(&[KeyParam::MaxUsesPerBoot(1)])).unwrap();
    let op = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[])).unwrap();
    km.abort(op.op_handle).unwrap();
    let result = km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[]));
    expect_err!(result, "KeyMaxOpsExceeded");

    // Nonces are only accepted from callers when the key allows it.
    let key = km.generate_key(&aes_gcm_key_params(&[])).unwrap();
    let result =
        km.begin(KeyPurpose::Encrypt, &key.key_blob, &gcm_params(&[KeyParam::Nonce(vec![0; 12])]));
    expect_err!(result, "CallerNonceProhibited");

    let result = km.begin(KeyPurpose::Sign, &key.key_blob, &gcm_params(&[]));
    expect_err!(result, "UnsupportedPurpose");
}

#[test]
fn test_unknown_handle() {
    let mut km = keymaster(KeymasterConfig::default());
    let result = km.update(0x1234, &[], b"data");
    expect_err!(result, "InvalidOperationHandle");
    let result = km.finish(0x1234, &[], b"data", None);
    expect_err!(result, "InvalidOperationHandle");
    let result = km.abort(0);
    expect_err!(result, "InvalidOperationHandle");
    assert_eq!(km.operation_count(), 0);
}
