use super::*;
use crate::expect_err;
use crate::wire::keymint::{Algorithm, KeyParam};
use alloc::vec;

#[test]
fn test_format_of() {
    assert_eq!(Format::of(&[0x00, 0x01]).unwrap(), Format::AuthEncrypted);
    assert_eq!(Format::of(&[0x01]).unwrap(), Format::IntegrityAssured);
    expect_err!(Format::of(&[0x02, 0x00]), "InvalidKeyBlob");
    expect_err!(Format::of(&[0xff]), "InvalidKeyBlob");
    expect_err!(Format::of(&[]), "InvalidKeyBlob");
}

#[test]
fn test_split_integrity_assured() {
    let data = hex::decode(concat!(
        "01",       // version
        "00000002", // key length
        "bbbb",     // key material
        "00000001", // hw_enforced: one entry
        "10000002", "00000004", "00000080", // ALGORITHM = HMAC
        "00000000",         // sw_enforced: empty
        "0102030405060708", // mac
    ))
    .unwrap();
    let parts = split_integrity_assured(&data).unwrap();
    assert_eq!(parts.key_material, &[0xbb, 0xbb]);
    assert_eq!(
        parts.hw_enforced,
        AuthorizationSet::from_params(&[KeyParam::Algorithm(Algorithm::Hmac)]).unwrap()
    );
    assert!(parts.sw_enforced.is_empty());
    assert_eq!(parts.signed, &data[..data.len() - INTEGRITY_MAC_LEN]);
    assert_eq!(parts.mac, &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_split_integrity_assured_fail() {
    let tests = vec![
        ("", "too short"),
        ("00 00000000 00000000 00000000 0000000000000000", "not an integrity-assured"),
        ("01 00000004 bbbb 00000000 00000000 0000000000000000", "exceeds blob"),
        ("01 00000002 bbbb 00000000 00000000 ff 0000000000000000", "trailing bytes"),
        ("01 00000002 bbbb 00000001 00000000 0000000000000000", "failed to parse"),
        ("01 00000000 00000000 0000000000000000", "failed to parse"),
    ];
    for (hex_data, msg) in tests {
        let data = hex::decode(hex_data.replace(' ', "")).unwrap();
        let result = split_integrity_assured(&data);
        assert!(result.is_err(), "unexpected success for {}", hex_data);
        let err = result.unwrap_err();
        assert_eq!(err.code(), crate::wire::keymint::ErrorCode::InvalidKeyBlob);
        if msg != "too short" {
            assert!(alloc::format!("{:?}", err).contains(msg), "{:?} lacks '{}'", err, msg);
        }
    }
}

#[test]
fn test_split_auth_encrypted() {
    let data = hex::decode(concat!(
        "00",                       // version
        "00000000",                 // hw_enforced: empty
        "00000000",                 // sw_enforced: empty
        "000102030405060708090a0b", // nonce
        "aabbcc",                   // ciphertext
        "00112233445566778899aabbccddeeff", // tag
    ))
    .unwrap();
    let parts = split_auth_encrypted(&data).unwrap();
    assert!(parts.hw_enforced.is_empty());
    assert!(parts.sw_enforced.is_empty());
    assert_eq!(parts.nonce, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
    assert_eq!(parts.ciphertext.len(), 3 + TAG_LEN);

    // Nonce and tag present but no ciphertext is acceptable (empty key material).
    let short = &data[..data.len() - 3 - TAG_LEN];
    let mut no_ct = short.to_vec();
    no_ct.extend_from_slice(&[0u8; TAG_LEN]);
    assert_eq!(split_auth_encrypted(&no_ct).unwrap().ciphertext.len(), TAG_LEN);

    // Missing part of the tag.
    expect_err!(split_auth_encrypted(&data[..data.len() - 3 - TAG_LEN + 1]), "too short");
    // Wrong version.
    let mut bad = data.clone();
    bad[0] = 1;
    expect_err!(split_auth_encrypted(&bad), "not an auth-encrypted");
}

#[test]
fn test_debug_hides_key_material() {
    let blob = PlaintextKeyBlob {
        key_material: Zeroizing::new(vec![0x42; 16]),
        hw_enforced: AuthorizationSet::new(),
        sw_enforced: AuthorizationSet::new(),
    };
    let dbg = alloc::format!("{:?}", blob);
    assert!(!dbg.contains("66"), "{}", dbg);
    assert!(dbg.contains("..."));
}
