use sha2::Digest;
use skm_common::{crypto, crypto::SHA256_DIGEST_LEN, Error};

/// [`crypto::Sha256`] implementation based on the `sha2` crate.
#[derive(Clone, Copy, Default)]
pub struct RustCryptoSha256;

impl crypto::Sha256 for RustCryptoSha256 {
    fn hash_chunks(&self, chunks: &[&[u8]]) -> Result<[u8; SHA256_DIGEST_LEN], Error> {
        let mut hasher = sha2::Sha256::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        let mut out = [0u8; SHA256_DIGEST_LEN];
        out.copy_from_slice(&hasher.finalize());
        Ok(out)
    }
}
