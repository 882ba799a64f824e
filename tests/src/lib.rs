//! Test methods to confirm basic functionality of trait implementations.

use core::convert::TryInto;
use skm_common::crypto::{
    aes, hmac, rsa, Aes, ConstTimeEq, Hmac, KeyMaterial, Rng, Rsa, Sha256, SymmetricOperation,
};
use skm_common::wire::{keymint::Digest, keymint::ErrorCode, KeySizeInBits, RsaExponent};

/// Test basic [`Rng`] functionality.
pub fn test_rng<R: Rng>(rng: &mut R) {
    let u1 = rng.next_u64().unwrap();
    let u2 = rng.next_u64().unwrap();
    assert_ne!(u1, u2);

    let mut b1 = [0u8; 16];
    let mut b2 = [0u8; 16];
    rng.fill_bytes(&mut b1).unwrap();
    rng.fill_bytes(&mut b2).unwrap();
    assert_ne!(b1, b2);

    rng.add_entropy(&b1);
    rng.add_entropy(&[]);
    rng.fill_bytes(&mut b1).unwrap();
    assert_ne!(b1, b2);
}

/// Test basic [`ConstTimeEq`] functionality. Does not test the key constant-time property though.
pub fn test_eq<E: ConstTimeEq>(comparator: E) {
    let b0 = [];
    let b1 = [0u8, 1u8, 2u8];
    let b2 = [1u8, 1u8, 2u8];
    let b3 = [0u8, 1u8, 3u8];
    let b4 = [0u8, 1u8, 2u8, 3u8];
    let b5 = [42; 4096];
    let mut b6 = [42; 4096];
    b6[4095] = 43;
    assert!(comparator.eq(&b0, &b0));
    assert!(comparator.eq(&b5, &b5));

    assert!(comparator.ne(&b0, &b1));
    assert!(comparator.ne(&b0, &b5));
    assert!(comparator.eq(&b1, &b1));
    assert!(comparator.ne(&b1, &b2));
    assert!(comparator.ne(&b1, &b3));
    assert!(comparator.ne(&b1, &b4));
    assert!(comparator.ne(&b5, &b6));
}

/// Test basic [`Sha256`] functionality.
pub fn test_sha256<S: Sha256>(sha256: S) {
    let abc = b"abc".as_slice();
    let long = b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq".as_slice();
    let tests: Vec<(Vec<&[u8]>, &str)> = vec![
        (vec![], "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
        (vec![abc], "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
        (
            vec![&abc[..1], &abc[..0], &abc[1..]],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ),
        (vec![long], "248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"),
    ];
    for (i, (chunks, want)) in tests.iter().enumerate() {
        let got = sha256.hash_chunks(chunks).unwrap();
        assert_eq!(hex::encode(got), *want, "incorrect digest in test case {}", i);
    }
    assert_eq!(
        hex::encode(sha256.hash(b"abc").unwrap()),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

/// Test basic HMAC functionality.
pub fn test_hmac<H: Hmac>(hmac: H) {
    struct TestCase {
        digest: Digest,
        tag_size: usize,
        key: &'static [u8],
        data: &'static [u8],
        expected_mac: &'static str,
    }

    const HMAC_TESTS : &[TestCase] = &[
        // Test cases from RFC 2202 Section 2 and 3
        TestCase {
            digest: Digest::Md5,
            tag_size: 16,
            key: &[0x0b; 16],
            data: b"Hi There",
            expected_mac: "9294727a3638bb1c13f48ef8158bfc9d",
        },
        TestCase {
            digest: Digest::Sha1,
            tag_size: 20,
            key: &[0x0b; 20],
            data: b"Hi There",
            expected_mac: "b617318655057264e28bc0b6fb378c8ef146be00",
        },
        // Test cases from RFC 4231 Section 4.2
        TestCase {
            digest: Digest::Sha224,
            tag_size: 224/8,
            key: &[0x0b; 20],
            data: b"Hi There",
            expected_mac: concat!(
                "896fb1128abbdf196832107cd49df33f",
                "47b4b1169912ba4f53684b22",
            ),
        },
        TestCase {
            digest: Digest::Sha256,
            tag_size: 256/8,
            key: &[0x0b; 20],
            data: b"Hi There",
            expected_mac: concat!(
                "b0344c61d8db38535ca8afceaf0bf12b",
                "881dc200c9833da726e9376c2e32cff7",
            ),
        },
        TestCase {
            digest: Digest::Sha384,
            tag_size: 384/8,
            key: &[0x0b; 20],
            data: b"Hi There",
            expected_mac: concat!(
                "afd03944d84895626b0825f4ab46907f",
                "15f9dadbe4101ec682aa034c7cebc59c",
                "faea9ea9076ede7f4af152e8b2fa9cb6",
            ),
        },
        TestCase {
            digest: Digest::Sha512,
            tag_size: 512/8,
            key: &[0x0b; 20],
            data: b"Hi There",
            expected_mac: concat!(
                "87aa7cdea5ef619d4ff0b4241a1d6cb0",
                "2379f4e2ce4ec2787ad0b30545e17cde",
                "daa833b7d6b8a702038b274eaea3f4e4",
                "be9d914eeb61f1702e696c203a126854"
            ),
        },
        // Test cases from RFC 4231 Section 4.3
        TestCase {
            digest: Digest::Sha256,
            tag_size: 256/8,
            key: b"Jefe",
            data: b"what do ya want for nothing?",
            expected_mac: concat!(
                "5bdcc146bf60754e6a042426089575c7",
                "5a003f089d2739839dec58b964ec3843"
            ),
        },
        TestCase {
            digest: Digest::Sha512,
            tag_size: 512/8,
            key: b"Jefe",
            data: b"what do ya want for nothing?",
            expected_mac: concat!(
                "164b7a7bfcf819e2e395fbe73b56e0a3",
                "87bd64222e831fd610270cd7ea250554",
                "9758bf75c05a994a6d034f65f8f0e6fd",
                "caeab1a34d4a6b4b636e070a38bce737"
            ),
        },
        // Test cases from RFC 4231 Section 4.4
        TestCase {
            digest: Digest::Sha256,
            tag_size: 256/8,
            key: &[0xaa; 20],
            data: &[0xdd; 50],
            expected_mac: concat!(
                "773ea91e36800e46854db8ebd09181a7",
                "2959098b3ef8c122d9635514ced565fe"
            ),
        },
        TestCase {
            digest: Digest::Sha384,
            tag_size: 384/8,
            key: &[0xaa; 20],
            data: &[0xdd; 50],
            expected_mac: concat!(
                "88062608d3e6ad8a0aa2ace014c8a86f",
                "0aa635d947ac9febe83ef4e55966144b",
                "2a5ab39dc13814b94e3ab6e101a34f27"
            ),
        },
    ];

    for (i, test) in HMAC_TESTS.iter().enumerate() {
        let mut op = hmac.begin(hmac::Key(test.key.to_vec()), test.digest).unwrap();
        // Feed the data in two pieces to exercise incremental update.
        let (left, right) = test.data.split_at(test.data.len() / 2);
        op.update(left).unwrap();
        op.update(right).unwrap();
        let mut mac = op.finish().unwrap();
        mac.truncate(test.tag_size);

        assert_eq!(
            hex::encode(&mac),
            test.expected_mac[..(test.tag_size * 2)],
            "incorrect mac in test case {}",
            i
        );
    }
}

/// Run a complete AES operation over `data`, fed in pieces of `chunk` bytes.
fn aes_run<A: Aes>(
    aes: &A,
    key: &[u8],
    mode: aes::CipherMode,
    dir: SymmetricOperation,
    data: &[u8],
    chunk: usize,
) -> Result<Vec<u8>, skm_common::Error> {
    let mut op = aes.begin(aes::Key::new_from(key).unwrap(), mode, dir)?;
    let mut out = Vec::new();
    for piece in data.chunks(chunk) {
        out.extend_from_slice(&op.update(piece)?);
    }
    out.extend_from_slice(&op.finish()?);
    Ok(out)
}

/// Test AES block and stream cipher modes.
pub fn test_aes_modes<A: Aes>(aes: A) {
    // Test vectors from NIST SP 800-38A, F.1.1, F.2.1 and F.5.1 (first two blocks).
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    let msg =
        hex::decode("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51").unwrap();
    let tests = vec![
        (
            aes::CipherMode::EcbNoPadding,
            "3ad77bb40d7a3660a89ecaf32466ef97f5d3d58503b9699de785895a96fdbaaf",
        ),
        (
            aes::CipherMode::CbcNoPadding {
                nonce: hex::decode("000102030405060708090a0b0c0d0e0f")
                    .unwrap()
                    .try_into()
                    .unwrap(),
            },
            "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2",
        ),
        (
            aes::CipherMode::Ctr {
                nonce: hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff")
                    .unwrap()
                    .try_into()
                    .unwrap(),
            },
            "874d6191b620e3261bef6864990db6ce9806f66b7970fdff8617187bb9fffdff",
        ),
    ];
    for (mode, want) in tests {
        for chunk in [1, 7, 16, 32] {
            let ct = aes_run(&aes, &key, mode, SymmetricOperation::Encrypt, &msg, chunk).unwrap();
            assert_eq!(hex::encode(&ct), want, "mode {:?} chunk {}", mode, chunk);
            let pt = aes_run(&aes, &key, mode, SymmetricOperation::Decrypt, &ct, chunk).unwrap();
            assert_eq!(pt, msg, "mode {:?} chunk {}", mode, chunk);
        }
    }

    // CTR mode handles arbitrary lengths.
    let ctr = aes::CipherMode::Ctr { nonce: [0x42; 16] };
    let ct = aes_run(&aes, &key, ctr, SymmetricOperation::Encrypt, &msg[..21], 5).unwrap();
    assert_eq!(ct.len(), 21);
    let pt = aes_run(&aes, &key, ctr, SymmetricOperation::Decrypt, &ct, 3).unwrap();
    assert_eq!(pt, &msg[..21]);

    // Unpadded modes reject partial blocks.
    let result =
        aes_run(&aes, &key, aes::CipherMode::EcbNoPadding, SymmetricOperation::Encrypt, &msg[..20], 16);
    assert_eq!(result.unwrap_err().code(), ErrorCode::InvalidInputLength);

    // PKCS#7 padding always adds between 1 and 16 bytes.
    let cbc_pkcs7 = aes::CipherMode::CbcPkcs7Padding { nonce: [0x11; 16] };
    for len in [0, 1, 15, 16, 17, 32] {
        for mode in [aes::CipherMode::EcbPkcs7Padding, cbc_pkcs7] {
            let ct =
                aes_run(&aes, &key, mode, SymmetricOperation::Encrypt, &msg[..len], 5).unwrap();
            assert_eq!(ct.len(), (len / 16 + 1) * 16);
            let pt = aes_run(&aes, &key, mode, SymmetricOperation::Decrypt, &ct, 5).unwrap();
            assert_eq!(pt, &msg[..len]);
        }
    }

    // Decrypting unpadded data as PKCS#7 fails on the padding check.
    let plain_ct =
        aes_run(&aes, &key, aes::CipherMode::EcbNoPadding, SymmetricOperation::Encrypt, &[0u8; 16], 16)
            .unwrap();
    let result = aes_run(
        &aes,
        &key,
        aes::CipherMode::EcbPkcs7Padding,
        SymmetricOperation::Decrypt,
        &plain_ct,
        16,
    );
    assert_eq!(result.unwrap_err().code(), ErrorCode::InvalidArgument);
}

/// Test basic AES-GCM functionality.
pub fn test_aes_gcm<A: Aes>(aes: A) {
    struct TestCase {
        key: &'static str,
        iv: &'static str,
        aad: &'static str,
        msg: &'static str,
        ct: &'static str,
        tag: &'static str,
    }
    // Test vectors from https://github.com/google/wycheproof/blob/master/testvectors/aes_gcm_test.json
    let tests = vec![
        TestCase {
            key: "5b9604fe14eadba931b0ccf34843dab9",
            iv: "028318abc1824029138141a2",
            aad: "",
            msg: "001d0c231287c1182784554ca3a21908",
            ct: "26073cc1d851beff176384dc9896d5ff",
            tag: "0a3ea7a5487cb5f7d70fb6c58d038554",
        },
        TestCase {
            key: "5b9604fe14eadba931b0ccf34843dab9",
            iv: "921d2507fa8007b7bd067d34",
            aad: "00112233445566778899aabbccddeeff",
            msg: "001d0c231287c1182784554ca3a21908",
            ct: "49d8b9783e911913d87094d1f63cc765",
            tag: "1e348ba07cca2cf04c618cb4d43a5b92",
        },
    ];
    for test in tests {
        let key = hex::decode(test.key).unwrap();
        let iv: [u8; 12] = hex::decode(test.iv).unwrap().try_into().unwrap();
        let aad = hex::decode(test.aad).unwrap();
        let msg = hex::decode(test.msg).unwrap();
        let tag = hex::decode(test.tag).unwrap();
        assert_eq!(tag.len(), 16); // Test data includes full 128-bit tag

        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Encrypt,
            )
            .unwrap();
        op.update_aad(&aad).unwrap();
        let mut got_ct = op.update(&msg).unwrap();
        got_ct.extend_from_slice(&op.finish().unwrap());
        assert_eq!(format!("{}{}", test.ct, test.tag), hex::encode(&got_ct));

        // AAD and data fed one byte at a time give the same result.
        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Encrypt,
            )
            .unwrap();
        for b in aad.chunks(1) {
            op.update_aad(b).unwrap();
        }
        let mut bytewise_ct = Vec::new();
        for b in msg.chunks(1) {
            bytewise_ct.extend_from_slice(&op.update(b).unwrap());
        }
        bytewise_ct.extend_from_slice(&op.finish().unwrap());
        assert_eq!(got_ct, bytewise_ct);

        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Decrypt,
            )
            .unwrap();
        op.update_aad(&aad).unwrap();
        let mut got_pt = Vec::new();
        for piece in got_ct.chunks(5) {
            got_pt.extend_from_slice(&op.update(piece).unwrap());
        }
        got_pt.extend_from_slice(&op.finish().unwrap());
        assert_eq!(test.msg, hex::encode(&got_pt));

        // Truncated tag should still decrypt.
        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag12 { nonce: iv },
                SymmetricOperation::Decrypt,
            )
            .unwrap();
        op.update_aad(&aad).unwrap();
        let mut got_pt = op.update(&got_ct[..got_ct.len() - 4]).unwrap();
        got_pt.extend_from_slice(&op.finish().unwrap());
        assert_eq!(test.msg, hex::encode(&got_pt));

        // Corrupted ciphertext should not decrypt.
        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Decrypt,
            )
            .unwrap();
        op.update_aad(&aad).unwrap();
        let mut corrupt_ct = got_ct.clone();
        corrupt_ct[0] ^= 0x01;
        let _corrupt_pt = op.update(&corrupt_ct).unwrap();
        assert_eq!(op.finish().unwrap_err().code(), ErrorCode::VerificationFailed);

        // AAD is not accepted once data has started.
        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Encrypt,
            )
            .unwrap();
        op.update(&msg).unwrap();
        assert_eq!(op.update_aad(&aad).unwrap_err().code(), ErrorCode::InvalidTag);

        // Input shorter than the tag cannot be decrypted.
        let mut op = aes
            .begin_aead(
                aes::Key::new_from(&key).unwrap(),
                aes::GcmMode::GcmTag16 { nonce: iv },
                SymmetricOperation::Decrypt,
            )
            .unwrap();
        assert!(op.update(&got_ct[..10]).unwrap().is_empty());
        assert_eq!(op.finish().unwrap_err().code(), ErrorCode::InvalidInputLength);
    }
}

/// Test RSA signing, verification, encryption and decryption with a freshly generated key.
pub fn test_rsa<T: Rsa, R: Rng>(rsa: T, rng: &mut R) {
    let key = match rsa.generate_key(rng, KeySizeInBits(1024), RsaExponent(65537)).unwrap() {
        KeyMaterial::Rsa(key) => key,
        other => panic!("unexpected key material {:?}", other),
    };
    let (size, exponent) = key.params().unwrap();
    assert_eq!(size, KeySizeInBits(1024));
    assert_eq!(exponent, RsaExponent(65537));
    assert_eq!(key.size().unwrap(), 128);

    let msg = b"the message to be signed";
    for mode in [
        rsa::SignMode::NoPadding,
        rsa::SignMode::Pkcs1_1_5Padding(Digest::None),
        rsa::SignMode::Pkcs1_1_5Padding(Digest::Sha256),
        rsa::SignMode::PssPadding(Digest::Sha256),
        rsa::SignMode::PssPadding(Digest::Sha1),
    ] {
        let mut op = rsa.begin_sign(rng, key.clone(), mode).unwrap();
        op.update(&msg[..5]).unwrap();
        op.update(&msg[5..]).unwrap();
        let sig = op.finish().unwrap();
        assert_eq!(sig.len(), 128, "mode {:?}", mode);

        let mut op = rsa.begin_verify(key.clone(), mode).unwrap();
        op.update(msg).unwrap();
        op.finish(&sig).unwrap();

        let mut bad_sig = sig.clone();
        bad_sig[10] ^= 0x01;
        let mut op = rsa.begin_verify(key.clone(), mode).unwrap();
        op.update(msg).unwrap();
        assert_eq!(
            op.finish(&bad_sig).unwrap_err().code(),
            ErrorCode::VerificationFailed,
            "mode {:?}",
            mode
        );
    }

    for mode in [
        rsa::CryptMode::NoPadding,
        rsa::CryptMode::Pkcs1_1_5Padding,
        rsa::CryptMode::OaepPadding { msg_digest: Digest::Sha256 },
    ] {
        let plaintext: &[u8] = match mode {
            rsa::CryptMode::NoPadding => &[0x01; 128],
            _ => b"secret",
        };
        let mut op = rsa.begin_encrypt(rng, key.clone(), mode).unwrap();
        op.update(plaintext).unwrap();
        let ct = op.finish().unwrap();
        assert_eq!(ct.len(), 128);

        let mut op = rsa.begin_decrypt(rng, key.clone(), mode).unwrap();
        op.update(&ct).unwrap();
        assert_eq!(op.finish().unwrap(), plaintext, "mode {:?}", mode);
    }

    // Undigested input may not exceed the modulus size.
    let mut op = rsa.begin_sign(rng, key.clone(), rsa::SignMode::NoPadding).unwrap();
    op.update(&[0u8; 100]).unwrap();
    assert_eq!(op.update(&[0u8; 29]).unwrap_err().code(), ErrorCode::InvalidInputLength);

    // PKCS#1 undigested signing leaves room for the padding.
    let mode = rsa::SignMode::Pkcs1_1_5Padding(Digest::None);
    let mut op = rsa.begin_sign(rng, key, mode).unwrap();
    op.update(&[0x55; 120]).unwrap();
    assert_eq!(op.finish().unwrap_err().code(), ErrorCode::InvalidInputLength);
}
