use super::keymint::*;
use super::*;
use alloc::vec;

#[test]
fn test_tag_type() {
    let tests = vec![
        (Tag::Purpose, TagType::EnumRep),
        (Tag::Algorithm, TagType::Enum),
        (Tag::KeySize, TagType::Uint),
        (Tag::RsaPublicExponent, TagType::Ulong),
        (Tag::ActiveDatetime, TagType::Date),
        (Tag::CallerNonce, TagType::Bool),
        (Tag::ApplicationId, TagType::Bytes),
        (Tag::UserSecureId, TagType::UlongRep),
        (Tag::Invalid, TagType::Invalid),
    ];
    for (tag, want) in tests {
        assert_eq!(tag_type(tag), want, "failed for {:?}", tag);
    }
}

#[test]
fn test_raw_tag_value() {
    assert_eq!(raw_tag_value(Tag::Purpose), 1);
    assert_eq!(raw_tag_value(Tag::RsaPublicExponent), 200);
    assert_eq!(raw_tag_value(Tag::AttestationApplicationId), 709);
    assert_eq!(raw_tag_value(Tag::Nonce), 1001);
}

#[test]
fn test_try_from_raw() {
    assert_eq!(Tag::try_from(-1879047191).unwrap(), Tag::Nonce);
    assert_eq!(ErrorCode::try_from(-33).unwrap(), ErrorCode::InvalidKeyBlob);
    assert_eq!(PaddingMode::try_from(64).unwrap(), PaddingMode::Pkcs7);
    assert!(Algorithm::try_from(33).is_err());
    assert!(Tag::try_from(42).is_err());
}

#[test]
fn test_param_tag() {
    let params = vec![
        (KeyParam::Purpose(KeyPurpose::Sign), Tag::Purpose),
        (KeyParam::KeySize(KeySizeInBits(128)), Tag::KeySize),
        (KeyParam::RsaPublicExponent(RsaExponent(65537)), Tag::RsaPublicExponent),
        (KeyParam::AssociatedData(vec![1, 2]), Tag::AssociatedData),
        (KeyParam::ResetSinceIdRotation, Tag::ResetSinceIdRotation),
    ];
    for (param, want) in params {
        assert_eq!(param.tag(), want);
    }
}

#[test]
fn test_vec_try() {
    let v: Vec<u8> = vec_try![0u8; 12].unwrap();
    assert_eq!(v.len(), 12);
    let v = vec_try![1u32, 2u32].unwrap();
    assert_eq!(v, vec![1, 2]);
    let v = try_to_vec(&hex::decode("0102ff").unwrap()).unwrap();
    assert_eq!(v, vec![0x01, 0x02, 0xff]);

    let mut v: Vec<u8> = vec_try_with_capacity!(2).unwrap();
    v.try_push(3).unwrap();
    v.try_extend_from_slice(&[4, 5]).unwrap();
    assert_eq!(v, vec![3, 4, 5]);
}
