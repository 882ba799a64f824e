use crate::rc_err;
use log::error;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::Digest;
use skm_common::{crypto, Error};
use zeroize::Zeroize;

/// Seed length for [`StdRng`].
const SEED_LEN: usize = 32;

/// [`crypto::Rng`] implementation based on the `rand` crate's [`StdRng`].
///
/// Additional entropy is folded in by hashing it together with fresh generator output, and
/// re-seeding from the result.
pub struct RustCryptoRng {
    rng: StdRng,
}

impl RustCryptoRng {
    /// Create a generator seeded from the operating system.
    pub fn new() -> Result<Self, Error> {
        let mut seed = [0u8; SEED_LEN];
        crypto::EntropySource::fill_entropy(&mut OsEntropy, &mut seed)?;
        let rng = StdRng::from_seed(seed);
        seed.zeroize();
        Ok(Self { rng })
    }
}

impl crypto::Rng for RustCryptoRng {
    fn add_entropy(&mut self, data: &[u8]) {
        let mut current = [0u8; SEED_LEN];
        self.rng.fill_bytes(&mut current);
        let mut hasher = sha2::Sha256::new();
        hasher.update(current);
        hasher.update(data);
        let mut seed = [0u8; SEED_LEN];
        seed.copy_from_slice(&hasher.finalize());
        self.rng = StdRng::from_seed(seed);
        current.zeroize();
        seed.zeroize();
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.rng.fill_bytes(dest);
        Ok(())
    }
}

/// [`crypto::EntropySource`] backed by the operating system, via `getrandom`.
#[derive(Clone, Copy, Default)]
pub struct OsEntropy;

impl crypto::EntropySource for OsEntropy {
    fn fill_entropy(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        getrandom::getrandom(dest).map_err(|e| {
            error!("failed to read {} bytes of OS entropy: {}", dest.len(), e);
            rc_err!(UnknownError, "no OS entropy available")(e)
        })
    }
}
