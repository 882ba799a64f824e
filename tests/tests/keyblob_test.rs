// Integration test.

// Explicitly include alloc because macros from `skm_common` assume it.
extern crate alloc;

use skm_common::{
    crypto, crypto::Rng, expect_err, keyblob, keyblob::PlaintextKeyBlob, tag, tag::AuthorizationSet,
};
use skm_crypto_rust::{
    aes::RustCryptoAes, eq::RustCryptoEq, hmac::RustCryptoHmac, rng::RustCryptoRng,
    sha256::RustCryptoSha256,
};
use skm_common::wire::keymint::{self, ErrorCode, KeyParam};
use zeroize::Zeroizing;

const ROT: &[u8] = b"SW";

fn plaintext_keyblob() -> PlaintextKeyBlob {
    PlaintextKeyBlob {
        key_material: Zeroizing::new(vec![0x42; 16]),
        hw_enforced: AuthorizationSet::from_params(&[
            KeyParam::Algorithm(keymint::Algorithm::Aes),
            KeyParam::KeySize(skm_common::wire::KeySizeInBits(128)),
            KeyParam::BlockMode(keymint::BlockMode::Ecb),
            KeyParam::Padding(keymint::PaddingMode::None),
            KeyParam::Origin(keymint::KeyOrigin::Generated),
        ])
        .unwrap(),
        sw_enforced: AuthorizationSet::from_params(&[
            KeyParam::OsVersion(110000),
            KeyParam::OsPatchlevel(202310),
        ])
        .unwrap(),
    }
}

fn hidden(app_id: &[u8]) -> AuthorizationSet {
    tag::hidden(&[KeyParam::ApplicationId(app_id.to_vec())], ROT).unwrap()
}

fn decrypt(
    master_key: &crypto::aes::Key,
    data: &[u8],
    hidden: &AuthorizationSet,
) -> Result<PlaintextKeyBlob, skm_common::Error> {
    keyblob::decrypt(
        &RustCryptoAes,
        &RustCryptoSha256,
        &RustCryptoHmac,
        &RustCryptoEq,
        master_key,
        data,
        hidden,
    )
}

#[test]
fn test_encrypted_keyblob_roundtrip() {
    let mut rng = RustCryptoRng::new().unwrap();
    let mut raw_master = [0u8; 32];
    rng.fill_bytes(&mut raw_master).unwrap();
    let master_key = crypto::aes::Key::Aes256(raw_master);
    let plaintext = plaintext_keyblob();
    let hidden = hidden(b"app_id");

    let encrypted = keyblob::encrypt(
        &RustCryptoAes,
        &RustCryptoSha256,
        &mut rng,
        &master_key,
        &plaintext,
        &hidden,
    )
    .unwrap();
    assert_eq!(encrypted[0], keyblob::AUTH_ENCRYPTED_VERSION);
    // Key material does not appear in the clear.
    assert!(!encrypted.windows(16).any(|w| w == [0x42; 16]));

    let recovered = decrypt(&master_key, &encrypted, &hidden).unwrap();
    assert_eq!(recovered, plaintext);

    // Two encryptions of the same key use fresh nonces.
    let again = keyblob::encrypt(
        &RustCryptoAes,
        &RustCryptoSha256,
        &mut rng,
        &master_key,
        &plaintext,
        &hidden,
    )
    .unwrap();
    assert_ne!(again, encrypted);
}

#[test]
fn test_encrypted_keyblob_tamper() {
    let mut rng = RustCryptoRng::new().unwrap();
    let master_key = crypto::aes::Key::Aes256([0u8; 32]);
    let plaintext = plaintext_keyblob();
    let hidden = hidden(b"app_id");
    let encrypted = keyblob::encrypt(
        &RustCryptoAes,
        &RustCryptoSha256,
        &mut rng,
        &master_key,
        &plaintext,
        &hidden,
    )
    .unwrap();

    // Flipping any single bit after the version byte is detected.
    for i in 1..encrypted.len() {
        let mut data = encrypted.clone();
        data[i] ^= 0x01;
        let result = decrypt(&master_key, &data, &hidden);
        assert_eq!(
            result.unwrap_err().code(),
            ErrorCode::InvalidKeyBlob,
            "corruption at offset {} undetected",
            i
        );
    }

    // Wrong hidden parameters.
    let result = decrypt(&master_key, &encrypted, &self::hidden(b"other_app"));
    expect_err!(result, "InvalidKeyBlob");

    // Wrong master key.
    let result = decrypt(&crypto::aes::Key::Aes256([1u8; 32]), &encrypted, &hidden);
    expect_err!(result, "InvalidKeyBlob");

    // Unknown version.
    let mut data = encrypted.clone();
    data[0] = 2;
    expect_err!(decrypt(&master_key, &data, &hidden), "unknown key blob version 2");

    // Any truncation is invalid.
    for len in 0..encrypted.len() {
        assert!(decrypt(&master_key, &encrypted[..len], &hidden).is_err(), "len {}", len);
    }
}

#[test]
fn test_integrity_assured_keyblob() {
    let master_key = crypto::aes::Key::Aes256([0u8; 32]);
    let plaintext = plaintext_keyblob();
    let hidden = hidden(b"app_id");
    let data = keyblob::integrity_assure(&RustCryptoHmac, &plaintext, &hidden).unwrap();

    assert_eq!(data[0], keyblob::INTEGRITY_ASSURED_VERSION);
    assert_eq!(&data[1..5], &[0, 0, 0, 16]);
    assert_eq!(&data[5..21], &[0x42; 16]);
    assert_eq!(
        data.len(),
        1 + 4
            + 16
            + plaintext.hw_enforced.serialized_size()
            + plaintext.sw_enforced.serialized_size()
            + keyblob::INTEGRITY_MAC_LEN
    );

    let recovered = decrypt(&master_key, &data, &hidden).unwrap();
    assert_eq!(recovered, plaintext);

    // The MAC covers the hidden parameters.
    expect_err!(decrypt(&master_key, &data, &self::hidden(b"app_id2")), "integrity check");

    for i in 1..data.len() {
        let mut corrupt = data.clone();
        corrupt[i] ^= 0x80;
        assert!(decrypt(&master_key, &corrupt, &hidden).is_err(), "offset {}", i);
    }
}

#[test]
fn test_integrity_mac_vector() {
    // An empty key with no authorizations, MAC computed over the blob and the hidden set.
    let plaintext = PlaintextKeyBlob {
        key_material: Zeroizing::new(vec![0xbb, 0xbb]),
        hw_enforced: AuthorizationSet::new(),
        sw_enforced: AuthorizationSet::new(),
    };
    let hidden = tag::hidden(&[], ROT).unwrap();
    let data = keyblob::integrity_assure(&RustCryptoHmac, &plaintext, &hidden).unwrap();
    let body_len = data.len() - keyblob::INTEGRITY_MAC_LEN;
    assert_eq!(hex::encode(&data[..body_len]), "0100000002bbbb0000000000000000");

    let mut input = data[..body_len].to_vec();
    input.extend_from_slice(&hidden.serialize().unwrap());
    let full =
        crypto::hmac_sha256(&RustCryptoHmac, keyblob::INTEGRITY_MAC_KEY, &input).unwrap();
    assert_eq!(&data[body_len..], &full[..keyblob::INTEGRITY_MAC_LEN]);
}
