//! Functionality related to RSA.

use super::KeyMaterial;
use crate::{get_opt_tag_value, km_err, tag, try_to_vec, Error};
use alloc::vec::Vec;
use der::{Decode, Encode};
use pkcs1::RsaPrivateKey;
use skm_wire::{
    keymint::{Digest, KeyParam, PaddingMode},
    KeySizeInBits, RsaExponent,
};
use spki::{AlgorithmIdentifier, SubjectPublicKeyInfo};
use zeroize::ZeroizeOnDrop;

/// Overhead for PKCS#1 v1.5 signature padding of undigested messages.  Digested messages have
/// additional overhead, for the digest algorithmIdentifier required by PKCS#1.
pub const PKCS1_UNDIGESTED_SIGNATURE_PADDING_OVERHEAD: usize = 11;

/// Overhead for PSS padding beyond twice the digest length.
pub const PSS_OVERHEAD: usize = 2;

/// OID value for PKCS#1-encoded RSA keys held in PKCS#8 and X.509; see RFC 3447 A.1.
pub const X509_OID: pkcs8::ObjectIdentifier =
    pkcs8::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// OID value for PKCS#1 signature with SHA-256 and RSA, see RFC 4055 s5.
pub const SHA256_PKCS1_SIGNATURE_OID: pkcs8::ObjectIdentifier =
    pkcs8::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// Padding modes that RSA signing and verification support.
pub const SUPPORTED_SIGN_PADDINGS: &[PaddingMode] =
    &[PaddingMode::None, PaddingMode::RsaPkcs115Sign, PaddingMode::RsaPss];

/// Padding modes that RSA encryption and decryption support.
pub const SUPPORTED_CRYPT_PADDINGS: &[PaddingMode] =
    &[PaddingMode::None, PaddingMode::RsaOaep, PaddingMode::RsaPkcs115Encrypt];

/// Digests that RSA operations support.
pub const SUPPORTED_DIGESTS: &[Digest] = &[
    Digest::None,
    Digest::Md5,
    Digest::Sha1,
    Digest::Sha224,
    Digest::Sha256,
    Digest::Sha384,
    Digest::Sha512,
];

/// An RSA key, in the form of an ASN.1 DER encoding of an PKCS#1 `RSAPrivateKey` structure,
/// as specified by RFC 3447 sections A.1.2 and 3.2:
///
/// ```asn1
/// RSAPrivateKey ::= SEQUENCE {
///     version           Version,
///     modulus           INTEGER,  -- n
///     publicExponent    INTEGER,  -- e
///     privateExponent   INTEGER,  -- d
///     prime1            INTEGER,  -- p
///     prime2            INTEGER,  -- q
///     exponent1         INTEGER,  -- d mod (p-1)
///     exponent2         INTEGER,  -- d mod (q-1)
///     coefficient       INTEGER,  -- (inverse of q) mod p
///     otherPrimeInfos   OtherPrimeInfos OPTIONAL
/// }
/// ```
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Return the public key information as an ASN.1 DER encodable `SubjectPublicKeyInfo`, as
    /// described in RFC 5280 section 4.1.
    ///
    /// ```asn1
    /// SubjectPublicKeyInfo  ::=  SEQUENCE  {
    ///    algorithm            AlgorithmIdentifier,
    ///    subjectPublicKey     BIT STRING  }
    /// ```
    ///
    /// For RSA keys, the contents are described in RFC 3279 section 2.3.1.
    ///
    /// - The `AlgorithmIdentifier` has an algorithm OID of 1.2.840.113549.1.1.1.
    /// - The `AlgorithmIdentifier` has `NULL` parameters.
    /// - The `subjectPublicKey` bit string holds an ASN.1 DER-encoded `SEQUENCE`:
    ///     ```asn1
    ///     RSAPublicKey ::= SEQUENCE {
    ///        modulus            INTEGER,    -- n
    ///        publicExponent     INTEGER  }  -- e
    ///     ```
    pub fn subject_public_key_info<'a>(
        &'a self,
        buf: &'a mut Vec<u8>,
    ) -> Result<SubjectPublicKeyInfo<'a>, Error> {
        let rsa_pvt_key = RsaPrivateKey::from_der(self.0.as_slice())?;
        let rsa_pub_key = rsa_pvt_key.public_key();
        rsa_pub_key.encode_to_vec(buf)?;
        Ok(SubjectPublicKeyInfo {
            algorithm: AlgorithmIdentifier { oid: X509_OID, parameters: Some(der::AnyRef::NULL) },
            subject_public_key: buf,
        })
    }

    /// Return the DER encoding of the key's `SubjectPublicKeyInfo`.
    pub fn subject_public_key_info_der(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        let spki = self.subject_public_key_info(&mut buf)?;
        Ok(spki.to_vec()?)
    }

    /// Size of the key (its modulus) in bytes.
    pub fn size(&self) -> Result<usize, Error> {
        let rsa_pvt_key = RsaPrivateKey::from_der(self.0.as_slice())
            .map_err(|e| km_err!(InvalidKeyBlob, "failed to parse RSA key: {:?}", e))?;
        Ok(rsa_pvt_key.modulus.as_bytes().len())
    }

    /// Size of the key (its modulus) in bits, together with its public exponent.
    pub fn params(&self) -> Result<(KeySizeInBits, RsaExponent), Error> {
        let rsa_pvt_key = RsaPrivateKey::from_der(self.0.as_slice())?;
        let modulus = rsa_pvt_key.modulus.as_bytes();
        let key_size = match modulus.first() {
            Some(b) => modulus.len() * 8 - b.leading_zeros() as usize,
            None => return Err(km_err!(InvalidArgument, "empty RSA modulus")),
        };
        let exponent = rsa_pvt_key.public_exponent.as_bytes();
        if exponent.len() > 8 {
            return Err(km_err!(UnsupportedKeySize, "RSA public exponent too large"));
        }
        let exponent = exponent.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        Ok((KeySizeInBits(key_size as u32), RsaExponent(exponent)))
    }
}

/// Import an RSA key in PKCS#8 format, also returning the key size in bits and public exponent.
pub fn import_pkcs8_key(data: &[u8]) -> Result<(KeyMaterial, KeySizeInBits, RsaExponent), Error> {
    let key_info = pkcs8::PrivateKeyInfo::try_from(data)
        .map_err(|_| km_err!(InvalidArgument, "failed to parse PKCS#8 RSA key"))?;
    if key_info.algorithm.oid != X509_OID {
        return Err(km_err!(
            InvalidArgument,
            "unexpected OID {:?} for PKCS#8 RSA key import",
            key_info.algorithm.oid
        ));
    }
    let key = Key(try_to_vec(key_info.private_key)?);
    let (key_size, exponent) = key
        .params()
        .map_err(|_e| km_err!(InvalidArgument, "failed to parse PKCS#1 RSA key"))?;
    Ok((KeyMaterial::Rsa(key), key_size, exponent))
}

/// RSA encryption/decryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMode {
    NoPadding,
    /// OAEP with the given label digest; MGF1 always uses SHA-1.
    OaepPadding { msg_digest: Digest },
    Pkcs1_1_5Padding,
}

impl CryptMode {
    /// Determine the [`CryptMode`] from begin `params`, checked against key characteristics
    /// `chars`.  OAEP requires a digest; no padding and PKCS#1 padding forbid one.
    pub fn new(chars: &[KeyParam], params: &[KeyParam]) -> Result<Self, Error> {
        let padding = tag::resolve_padding(chars, params, SUPPORTED_CRYPT_PADDINGS)?;
        match padding {
            PaddingMode::RsaOaep => {
                let msg_digest = tag::resolve_digest(chars, params)?;
                if msg_digest == Digest::None {
                    return Err(km_err!(IncompatibleDigest, "OAEP padding requires a digest"));
                }
                Ok(CryptMode::OaepPadding { msg_digest })
            }
            PaddingMode::None | PaddingMode::RsaPkcs115Encrypt => {
                if let Some(digest) = get_opt_tag_value!(params, Digest, UnsupportedDigest)? {
                    if *digest != Digest::None {
                        return Err(km_err!(
                            IncompatibleDigest,
                            "digest {:?} not allowed with padding {:?}",
                            digest,
                            padding
                        ));
                    }
                }
                Ok(if padding == PaddingMode::None {
                    CryptMode::NoPadding
                } else {
                    CryptMode::Pkcs1_1_5Padding
                })
            }
            _ => Err(km_err!(
                UnsupportedPaddingMode,
                "padding mode {:?} not supported for RSA encryption",
                padding
            )),
        }
    }
}

/// RSA signature mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    NoPadding,
    PssPadding(Digest),
    Pkcs1_1_5Padding(Digest),
}

impl SignMode {
    /// Determine the [`SignMode`] from begin `params`, checked against key characteristics
    /// `chars`, for a key of `key_len` bytes.
    pub fn new(chars: &[KeyParam], params: &[KeyParam], key_len: usize) -> Result<Self, Error> {
        let padding = tag::resolve_padding(chars, params, SUPPORTED_SIGN_PADDINGS)?;
        let digest = tag::resolve_digest(chars, params)?;
        match padding {
            PaddingMode::None => {
                if digest != Digest::None {
                    return Err(km_err!(
                        IncompatibleDigest,
                        "digest {:?} not allowed without padding",
                        digest
                    ));
                }
                Ok(SignMode::NoPadding)
            }
            PaddingMode::RsaPss => {
                if digest == Digest::None {
                    return Err(km_err!(IncompatiblePaddingMode, "PSS padding requires a digest"));
                }
                let digest_len = (tag::digest_len(digest)? / 8) as usize;
                if digest_len * 2 + PSS_OVERHEAD > key_len {
                    return Err(km_err!(
                        IncompatibleDigest,
                        "{}-byte digest cannot be used with {}-byte RSA key in PSS mode",
                        digest_len,
                        key_len
                    ));
                }
                Ok(SignMode::PssPadding(digest))
            }
            PaddingMode::RsaPkcs115Sign => Ok(SignMode::Pkcs1_1_5Padding(digest)),
            _ => Err(km_err!(
                UnsupportedPaddingMode,
                "padding mode {:?} not supported for RSA signing",
                padding
            )),
        }
    }

    /// Digest used by the mode.
    pub fn digest(&self) -> Digest {
        match self {
            SignMode::NoPadding => Digest::None,
            SignMode::PssPadding(d) | SignMode::Pkcs1_1_5Padding(d) => *d,
        }
    }
}
