//! Software Keymaster implementation: key generation and import, key blob handling, cryptographic
//! operations, key attestation and authorization enforcement.

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use log::{debug, error, info};
use skm_common::{
    crypto, km_err, tag, try_to_vec,
    wire::keymint::{
        Algorithm, BlockMode, Digest, KeyFormat, KeyParam, KeyPurpose, PaddingMode,
    },
    Error,
};

mod cert;
pub mod clock;
pub mod config;
mod context;
mod enforcement;
mod keys;
mod operation;

pub use crate::config::KeymasterConfig;
pub use crate::context::{MasterKeySource, ZeroMasterKey};
pub use crate::keys::{Key, KeyCharacteristics, KeyCreationResult};
pub use crate::operation::{BeginResult, UpdateResult};

use crate::{
    clock::{Clock, SystemClock},
    context::KeymasterContext,
    enforcement::Enforcement,
    operation::{OpHandle, Operation},
};


/// Maximum amount of caller-provided entropy accepted in one call.
const MAX_ADD_ENTROPY_LEN: usize = 2 * 1024;

/// Version triple reported by [`SoftKeymaster::get_version`].
const VERSION: (u8, u8, u8) = (2, 1, 0);

/// Software Keymaster device.
pub struct SoftKeymaster {
    /// Crypto implementations, key factories and key blob handling.
    ctx: KeymasterContext,

    /// The operation table.
    operations: Vec<Option<Operation>>,

    /// Per-key enforcement state.
    enforcement: Enforcement,
}

/// Log a failed request before handing the error back to the caller.
fn logged<T>(op: &str, result: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &result {
        error!("failing {:?} request with error {:?}", op, err);
    }
    result
}

impl SoftKeymaster {
    /// Create a new [`SoftKeymaster`] instance using the system clock and the all-zero master
    /// key.
    pub fn new(config: KeymasterConfig, imp: crypto::Implementation) -> Result<Self, Error> {
        Self::with_components(config, imp, Box::new(ZeroMasterKey), Box::new(SystemClock))
    }

    /// Create a new [`SoftKeymaster`] instance with an explicit master key source and clock.
    pub fn with_components(
        config: KeymasterConfig,
        imp: crypto::Implementation,
        master_key_source: Box<dyn MasterKeySource>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;
        info!(
            "starting software keymaster: blob format {:?}, security level {:?}, {} operation slots",
            config.blob_format, config.security_level, config.max_operations
        );
        // Work around Rust limitation that `vec![None; n]` doesn't work.
        let operations = (0..config.max_operations).map(|_| None).collect();
        Ok(Self {
            ctx: KeymasterContext::new(config, imp, master_key_source, clock),
            operations,
            enforcement: Enforcement::default(),
        })
    }

    /// Return the (major, minor, subminor) version of this implementation.
    pub fn get_version(&self) -> (u8, u8, u8) {
        VERSION
    }

    /// Set the OS version and patchlevel that keys are bound to.
    pub fn configure(&mut self, os_version: u32, os_patchlevel: u32) -> Result<(), Error> {
        info!("configured with OS version {} patchlevel {}", os_version, os_patchlevel);
        self.ctx.configure(os_version, os_patchlevel);
        Ok(())
    }

    /// Mix caller-provided entropy into the RNG.
    pub fn add_rng_entropy(&mut self, data: &[u8]) -> Result<(), Error> {
        logged("AddRngEntropy", self.add_rng_entropy_inner(data))
    }

    fn add_rng_entropy_inner(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_ADD_ENTROPY_LEN {
            return Err(km_err!(
                InvalidInputLength,
                "entropy of {} bytes exceeds limit {}",
                data.len(),
                MAX_ADD_ENTROPY_LEN
            ));
        }
        self.ctx.with_rng(|rng| {
            rng.add_entropy(data);
            Ok(())
        })
    }

    pub fn supported_algorithms(&self) -> Vec<Algorithm> {
        self.ctx.algorithms().collect()
    }

    pub fn supported_block_modes(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
    ) -> Result<Vec<BlockMode>, Error> {
        let factory = self.ctx.factory(algorithm)?.operation_factory(purpose)?;
        Ok(try_to_vec(factory.supported_block_modes())?)
    }

    pub fn supported_padding_modes(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
    ) -> Result<Vec<PaddingMode>, Error> {
        let factory = self.ctx.factory(algorithm)?.operation_factory(purpose)?;
        Ok(try_to_vec(factory.supported_padding_modes())?)
    }

    pub fn supported_digests(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
    ) -> Result<Vec<Digest>, Error> {
        let factory = self.ctx.factory(algorithm)?.operation_factory(purpose)?;
        Ok(try_to_vec(factory.supported_digests())?)
    }

    pub fn supported_import_formats(&self, algorithm: Algorithm) -> Result<Vec<KeyFormat>, Error> {
        Ok(try_to_vec(self.ctx.factory(algorithm)?.supported_import_formats())?)
    }

    pub fn supported_export_formats(&self, algorithm: Algorithm) -> Result<Vec<KeyFormat>, Error> {
        Ok(try_to_vec(self.ctx.factory(algorithm)?.supported_export_formats())?)
    }

    /// Generate a new key described by `params`, returning its key blob and characteristics.
    pub fn generate_key(&mut self, params: &[KeyParam]) -> Result<KeyCreationResult, Error> {
        logged("GenerateKey", self.generate_key_inner(params))
    }

    fn generate_key_inner(&mut self, params: &[KeyParam]) -> Result<KeyCreationResult, Error> {
        let algorithm = tag::get_algorithm(params)?;
        let result = self.ctx.factory(algorithm)?.generate_key(&self.ctx, params)?;
        debug!("generated {:?} key", algorithm);
        Ok(result)
    }

    /// Import key material held in `format`.
    pub fn import_key(
        &mut self,
        params: &[KeyParam],
        format: KeyFormat,
        key_data: &[u8],
    ) -> Result<KeyCreationResult, Error> {
        logged("ImportKey", self.import_key_inner(params, format, key_data))
    }

    fn import_key_inner(
        &mut self,
        params: &[KeyParam],
        format: KeyFormat,
        key_data: &[u8],
    ) -> Result<KeyCreationResult, Error> {
        let algorithm = tag::get_algorithm(params)?;
        let result =
            self.ctx.factory(algorithm)?.import_key(&self.ctx, params, format, key_data)?;
        debug!("imported {:?} key from {:?}", algorithm, format);
        Ok(result)
    }

    /// Return the characteristics of a key.  The `params` must hold the same application ID and
    /// data that the key was created with.
    pub fn get_key_characteristics(
        &self,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<KeyCharacteristics, Error> {
        logged("GetKeyCharacteristics", self.ctx.parse_key_blob(key_blob, params).map(|key| {
            KeyCharacteristics { hw_enforced: key.hw_enforced, sw_enforced: key.sw_enforced }
        }))
    }

    /// Export the public half of an asymmetric key.
    pub fn export_key(
        &self,
        format: KeyFormat,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<Vec<u8>, Error> {
        logged("ExportKey", self.export_key_inner(format, key_blob, params))
    }

    fn export_key_inner(
        &self,
        format: KeyFormat,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<Vec<u8>, Error> {
        let key = self.ctx.parse_key_blob(key_blob, params)?;
        let algorithm = key.algorithm();
        if !self.ctx.factory(algorithm)?.supported_export_formats().contains(&format) {
            return Err(km_err!(
                UnsupportedKeyFormat,
                "export format {:?} not supported for {:?} keys",
                format,
                algorithm
            ));
        }
        key.material.subject_public_key_info()?.ok_or_else(|| {
            km_err!(UnsupportedKeyFormat, "{:?} key has no public half", algorithm)
        })
    }

    /// Rebind a key blob to the current OS version and patchlevel.
    pub fn upgrade_key(&self, key_blob: &[u8], params: &[KeyParam]) -> Result<Vec<u8>, Error> {
        logged("UpgradeKey", self.ctx.upgrade_key_blob(key_blob, params))
    }

    /// Produce an attestation certificate chain for an asymmetric key.
    pub fn attest_key(
        &self,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<Vec<Vec<u8>>, Error> {
        logged(
            "AttestKey",
            self.ctx
                .parse_key_blob(key_blob, params)
                .and_then(|key| cert::attest_key(&self.ctx, &key, params)),
        )
    }

    /// Key blobs hold no server-side state, so deletion has nothing to do.
    pub fn delete_key(&mut self, _key_blob: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    pub fn delete_all_keys(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Start an operation with the key in `key_blob`.
    pub fn begin(
        &mut self,
        purpose: KeyPurpose,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<BeginResult, Error> {
        let result = self.begin_operation(purpose, key_blob, params);
        logged("Begin", result)
    }

    /// Feed additional authenticated data into an AEAD operation.
    pub fn update_aad(&mut self, op_handle: u64, aad: &[u8]) -> Result<(), Error> {
        let result = self.op_update_aad(OpHandle(op_handle), aad);
        logged("UpdateAad", result)
    }

    /// Feed data into an operation.  Associated data may also be supplied in `params`.
    pub fn update(
        &mut self,
        op_handle: u64,
        params: &[KeyParam],
        data: &[u8],
    ) -> Result<UpdateResult, Error> {
        let result = self.op_update(OpHandle(op_handle), params, data);
        logged("Update", result)
    }

    /// Complete an operation, releasing its handle whatever the outcome.
    pub fn finish(
        &mut self,
        op_handle: u64,
        params: &[KeyParam],
        data: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        let result = self.op_finish(OpHandle(op_handle), params, data, signature);
        logged("Finish", result)
    }

    pub fn abort(&mut self, op_handle: u64) -> Result<(), Error> {
        let result = self.op_abort(OpHandle(op_handle));
        logged("Abort", result)
    }

    /// Number of operations currently in flight.
    pub fn operation_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_some()).count()
    }
}
