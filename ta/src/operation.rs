//! Operation factories and in-progress crypto operations.

use crate::{context::KeymasterContext, keys::Key, SoftKeymaster};
use alloc::{boxed::Box, vec::Vec};
use skm_common::{
    crypto::{
        aes, hmac, rsa, AadOperation, AccumulatingOperation, ConstTimeEq, EmittingOperation,
        KeyMaterial, SymmetricOperation, VerifyOperation,
    },
    km_err, try_to_vec,
    wire::keymint::{Algorithm, BlockMode, Digest, KeyParam, KeyPurpose, PaddingMode},
    Error, FallibleAllocExt,
};
use log::{debug, info};

/// Union holder for in-progress cryptographic operations, each of which is an instance
/// of the relevant trait.
pub(crate) enum CryptoOperation {
    Aes(Box<dyn EmittingOperation + Send>),
    AesGcm(Box<dyn AadOperation + Send>),
    HmacSign(Box<dyn AccumulatingOperation + Send>, usize), // tag length
    HmacVerify(Box<dyn AccumulatingOperation + Send>, hmac::Mode),
    RsaEncrypt(Box<dyn AccumulatingOperation + Send>),
    RsaDecrypt(Box<dyn AccumulatingOperation + Send>),
    RsaSign(Box<dyn AccumulatingOperation + Send>),
    RsaVerify(Box<dyn VerifyOperation + Send>),
}

/// Newtype for operation handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpHandle(pub u64);

/// Result of starting an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginResult {
    /// Handle that identifies the operation in subsequent calls.
    pub op_handle: u64,
    /// Output parameters, such as a generated nonce.
    pub params: Vec<KeyParam>,
}

/// Result of feeding data into an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateResult {
    pub input_consumed: usize,
    pub output: Vec<u8>,
}

/// Per-(algorithm, purpose) construction of operations.
pub(crate) trait OperationFactory: Send + Sync {
    fn supported_block_modes(&self) -> &'static [BlockMode] {
        &[]
    }

    fn supported_padding_modes(&self) -> &'static [PaddingMode] {
        &[]
    }

    fn supported_digests(&self) -> &'static [Digest] {
        &[]
    }

    /// Start an operation with `key`, returning the operation and any output parameters.
    fn begin(
        &self,
        ctx: &KeymasterContext,
        key: Key,
        params: &[KeyParam],
    ) -> Result<(CryptoOperation, Vec<KeyParam>), Error>;
}

fn symmetric_direction(purpose: KeyPurpose) -> Result<SymmetricOperation, Error> {
    match purpose {
        KeyPurpose::Encrypt => Ok(SymmetricOperation::Encrypt),
        KeyPurpose::Decrypt => Ok(SymmetricOperation::Decrypt),
        _ => Err(km_err!(UnsupportedPurpose, "purpose {:?} is not a cipher direction", purpose)),
    }
}

pub(crate) struct AesOperationFactory {
    purpose: KeyPurpose,
}

impl AesOperationFactory {
    pub fn new(purpose: KeyPurpose) -> Self {
        Self { purpose }
    }
}

impl OperationFactory for AesOperationFactory {
    fn supported_block_modes(&self) -> &'static [BlockMode] {
        aes::SUPPORTED_BLOCK_MODES
    }

    fn supported_padding_modes(&self) -> &'static [PaddingMode] {
        aes::SUPPORTED_PADDING_MODES
    }

    fn begin(
        &self,
        ctx: &KeymasterContext,
        key: Key,
        params: &[KeyParam],
    ) -> Result<(CryptoOperation, Vec<KeyParam>), Error> {
        let dir = symmetric_direction(self.purpose)?;
        let chars = key.characteristics()?;
        let mode = ctx.with_rng(|rng| aes::Mode::new(&chars, params, dir, rng))?;
        let aes_key = match key.material {
            KeyMaterial::Aes(k) => k,
            other => {
                return Err(km_err!(
                    IncompatibleAlgorithm,
                    "AES operation with {:?} key",
                    other.algorithm()
                ))
            }
        };

        // Encryption reports the nonce in use, whether generated or caller-provided.
        let mut out_params = Vec::new();
        if dir == SymmetricOperation::Encrypt {
            if let Some(nonce) = mode.nonce() {
                out_params.try_push(KeyParam::Nonce(try_to_vec(nonce)?))?;
            }
        }
        let op = match mode {
            aes::Mode::Cipher(mode) => CryptoOperation::Aes(ctx.aes.begin(aes_key, mode, dir)?),
            aes::Mode::Aead(mode) => {
                CryptoOperation::AesGcm(ctx.aes.begin_aead(aes_key, mode, dir)?)
            }
        };
        Ok((op, out_params))
    }
}

pub(crate) struct HmacOperationFactory {
    purpose: KeyPurpose,
}

impl HmacOperationFactory {
    pub fn new(purpose: KeyPurpose) -> Self {
        Self { purpose }
    }
}

impl OperationFactory for HmacOperationFactory {
    fn supported_digests(&self) -> &'static [Digest] {
        hmac::SUPPORTED_DIGESTS
    }

    fn begin(
        &self,
        ctx: &KeymasterContext,
        key: Key,
        params: &[KeyParam],
    ) -> Result<(CryptoOperation, Vec<KeyParam>), Error> {
        let sign = match self.purpose {
            KeyPurpose::Sign => true,
            KeyPurpose::Verify => false,
            p => return Err(km_err!(UnsupportedPurpose, "purpose {:?} not supported for HMAC", p)),
        };
        let chars = key.characteristics()?;
        let mode = hmac::Mode::new(&chars, params, sign)?;
        let hmac_key = match key.material {
            KeyMaterial::Hmac(k) => k,
            other => {
                return Err(km_err!(
                    IncompatibleAlgorithm,
                    "HMAC operation with {:?} key",
                    other.algorithm()
                ))
            }
        };
        let op = ctx.hmac.begin(hmac_key, mode.digest)?;
        let op = match mode.mac_len {
            Some(mac_len) if sign => CryptoOperation::HmacSign(op, (mac_len / 8) as usize),
            Some(_) | None => CryptoOperation::HmacVerify(op, mode),
        };
        Ok((op, Vec::new()))
    }
}

pub(crate) struct RsaOperationFactory {
    purpose: KeyPurpose,
}

impl RsaOperationFactory {
    pub fn new(purpose: KeyPurpose) -> Self {
        Self { purpose }
    }
}

impl OperationFactory for RsaOperationFactory {
    fn supported_padding_modes(&self) -> &'static [PaddingMode] {
        match self.purpose {
            KeyPurpose::Sign | KeyPurpose::Verify => rsa::SUPPORTED_SIGN_PADDINGS,
            _ => rsa::SUPPORTED_CRYPT_PADDINGS,
        }
    }

    fn supported_digests(&self) -> &'static [Digest] {
        rsa::SUPPORTED_DIGESTS
    }

    fn begin(
        &self,
        ctx: &KeymasterContext,
        key: Key,
        params: &[KeyParam],
    ) -> Result<(CryptoOperation, Vec<KeyParam>), Error> {
        let chars = key.characteristics()?;
        let rsa_key = match key.material {
            KeyMaterial::Rsa(k) => k,
            other => {
                return Err(km_err!(
                    IncompatibleAlgorithm,
                    "RSA operation with {:?} key",
                    other.algorithm()
                ))
            }
        };
        let op = match self.purpose {
            KeyPurpose::Encrypt => {
                let mode = rsa::CryptMode::new(&chars, params)?;
                CryptoOperation::RsaEncrypt(
                    ctx.with_rng(|rng| ctx.rsa.begin_encrypt(rng, rsa_key, mode))?,
                )
            }
            KeyPurpose::Decrypt => {
                let mode = rsa::CryptMode::new(&chars, params)?;
                CryptoOperation::RsaDecrypt(
                    ctx.with_rng(|rng| ctx.rsa.begin_decrypt(rng, rsa_key, mode))?,
                )
            }
            KeyPurpose::Sign => {
                let mode = rsa::SignMode::new(&chars, params, rsa_key.size()?)?;
                CryptoOperation::RsaSign(
                    ctx.with_rng(|rng| ctx.rsa.begin_sign(rng, rsa_key, mode))?,
                )
            }
            KeyPurpose::Verify => {
                let mode = rsa::SignMode::new(&chars, params, rsa_key.size()?)?;
                CryptoOperation::RsaVerify(ctx.rsa.begin_verify(rsa_key, mode)?)
            }
            p => return Err(km_err!(UnsupportedPurpose, "purpose {:?} not supported for RSA", p)),
        };
        Ok((op, Vec::new()))
    }
}

/// Current state of an operation.
pub(crate) struct Operation {
    /// Random handle used to identify the operation.
    pub handle: OpHandle,

    pub algorithm: Algorithm,
    pub purpose: KeyPurpose,

    /// Characteristics of the key, re-checked on every update and finish.
    pub auths: Vec<KeyParam>,

    /// Whether associated data is allowed (only ever true for AEADs before data has arrived).
    pub aad_allowed: bool,

    /// Accumulated input size.
    pub input_size: usize,

    pub crypto_op: CryptoOperation,
}

impl Operation {
    /// Check whether `len` additional bytes of data can be accommodated by the `Operation`.
    fn check_size(&mut self, len: usize) -> Result<(), Error> {
        self.input_size = self.input_size.saturating_add(len);
        let max_size = match &self.crypto_op {
            CryptoOperation::HmacSign(op, _)
            | CryptoOperation::HmacVerify(op, _)
            | CryptoOperation::RsaEncrypt(op)
            | CryptoOperation::RsaDecrypt(op)
            | CryptoOperation::RsaSign(op) => op.max_input_size(),
            _ => None,
        };
        if let Some(max_size) = max_size {
            if self.input_size > max_size {
                return Err(km_err!(
                    InvalidInputLength,
                    "too much input accumulated for operation"
                ));
            }
        }
        Ok(())
    }

    /// Feed any `Tag::ASSOCIATED_DATA` values in `params` to the operation.
    fn absorb_aad(&mut self, params: &[KeyParam]) -> Result<(), Error> {
        for param in params {
            if let KeyParam::AssociatedData(aad) = param {
                self.update_aad(aad)?;
            }
        }
        Ok(())
    }

    pub fn update_aad(&mut self, aad: &[u8]) -> Result<(), Error> {
        if !self.aad_allowed {
            return Err(km_err!(InvalidTag, "associated data not allowed after data"));
        }
        match &mut self.crypto_op {
            CryptoOperation::AesGcm(op) => op.update_aad(aad),
            _ => Err(km_err!(InvalidTag, "operation does not take associated data")),
        }
    }

    pub fn update(&mut self, params: &[KeyParam], data: &[u8]) -> Result<Vec<u8>, Error> {
        self.absorb_aad(params)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        self.aad_allowed = false;
        self.check_size(data.len())?;
        match &mut self.crypto_op {
            CryptoOperation::Aes(op) => op.update(data),
            CryptoOperation::AesGcm(op) => op.update(data),
            CryptoOperation::HmacSign(op, _)
            | CryptoOperation::HmacVerify(op, _)
            | CryptoOperation::RsaEncrypt(op)
            | CryptoOperation::RsaDecrypt(op)
            | CryptoOperation::RsaSign(op) => {
                op.update(data)?;
                Ok(Vec::new())
            }
            CryptoOperation::RsaVerify(op) => {
                op.update(data)?;
                Ok(Vec::new())
            }
        }
    }

    /// Complete the operation, consuming it.  `signature` is only used by verification.
    pub fn finish(
        mut self,
        compare: &dyn ConstTimeEq,
        params: &[KeyParam],
        data: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        self.absorb_aad(params)?;
        self.check_size(data.len())?;
        match self.crypto_op {
            CryptoOperation::Aes(mut op) => {
                let mut result = op.update(data)?;
                result.try_extend_from_slice(&op.finish()?)?;
                Ok(result)
            }
            CryptoOperation::AesGcm(mut op) => {
                let mut result = op.update(data)?;
                result.try_extend_from_slice(&op.finish()?)?;
                Ok(result)
            }
            CryptoOperation::HmacSign(mut op, tag_len) => {
                op.update(data)?;
                let mut tag = op.finish()?;
                tag.truncate(tag_len);
                Ok(tag)
            }
            CryptoOperation::HmacVerify(mut op, mode) => {
                let sig = signature
                    .ok_or_else(|| km_err!(InvalidArgument, "signature missing for HMAC verify"))?;
                mode.check_signature_len(sig.len())?;
                op.update(data)?;
                let got = op.finish()?;
                match got.get(..sig.len()) {
                    Some(got) if compare.eq(got, sig) => Ok(Vec::new()),
                    _ => Err(km_err!(VerificationFailed, "HMAC verify failed")),
                }
            }
            CryptoOperation::RsaEncrypt(mut op)
            | CryptoOperation::RsaDecrypt(mut op)
            | CryptoOperation::RsaSign(mut op) => {
                op.update(data)?;
                op.finish()
            }
            CryptoOperation::RsaVerify(mut op) => {
                let sig = signature
                    .ok_or_else(|| km_err!(InvalidArgument, "signature missing for RSA verify"))?;
                op.update(data)?;
                op.finish(sig)?;
                Ok(Vec::new())
            }
        }
    }
}

impl SoftKeymaster {
    pub(crate) fn begin_operation(
        &mut self,
        purpose: KeyPurpose,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<BeginResult, Error> {
        let op_idx = self.new_operation_index()?;
        let key = self.ctx.parse_key_blob(key_blob, params)?;
        let algorithm = key.algorithm();
        let auths = key.characteristics()?;
        let key_id = self.ctx.key_id(key_blob)?;
        let pending = self.enforcement.authorize_begin(
            key_id,
            algorithm,
            purpose,
            &auths,
            params,
            self.ctx.now(),
        )?;

        let factory = self.ctx.factory(algorithm)?.operation_factory(purpose)?;
        let (crypto_op, out_params) = factory.begin(&self.ctx, key, params)?;
        let aad_allowed = matches!(crypto_op, CryptoOperation::AesGcm(_));
        let handle = self.new_op_handle()?;
        let mut op = Operation {
            handle,
            algorithm,
            purpose,
            auths,
            aad_allowed,
            input_size: 0,
            crypto_op,
        };
        op.absorb_aad(params)?;
        self.enforcement.record_use(pending);
        debug!("begin {:?} {:?} operation {:?}", algorithm, purpose, handle);
        self.operations[op_idx] = Some(op);
        Ok(BeginResult { op_handle: handle.0, params: out_params })
    }

    pub(crate) fn op_update_aad(&mut self, op_handle: OpHandle, aad: &[u8]) -> Result<(), Error> {
        self.with_authed_operation(op_handle, |op| op.update_aad(aad))
    }

    pub(crate) fn op_update(
        &mut self,
        op_handle: OpHandle,
        params: &[KeyParam],
        data: &[u8],
    ) -> Result<UpdateResult, Error> {
        self.with_authed_operation(op_handle, |op| {
            let output = op.update(params, data)?;
            Ok(UpdateResult { input_consumed: data.len(), output })
        })
    }

    pub(crate) fn op_finish(
        &mut self,
        op_handle: OpHandle,
        params: &[KeyParam],
        data: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        let op = self.take_operation(op_handle)?;
        self.enforcement.authorize_update(op.algorithm, op.purpose, &op.auths, self.ctx.now())?;
        op.finish(&*self.ctx.compare, params, data, signature)
    }

    pub(crate) fn op_abort(&mut self, op_handle: OpHandle) -> Result<(), Error> {
        let _op = self.take_operation(op_handle)?;
        info!("aborted operation {:?}", op_handle);
        Ok(())
    }

    fn new_operation_index(&self) -> Result<usize, Error> {
        self.operations.iter().position(Option::is_none).ok_or_else(|| {
            km_err!(TooManyOperations, "current op count {} >= limit", self.operations.len())
        })
    }

    /// Return a new non-zero operation handle value that is not currently in use in the
    /// operations table.
    fn new_op_handle(&self) -> Result<OpHandle, Error> {
        loop {
            let op_handle = OpHandle(self.ctx.with_rng(|rng| rng.next_u64())?);
            if op_handle.0 != 0 && self.op_index(op_handle).is_err() {
                return Ok(op_handle);
            }
            // op_handle already in use, go around again.
        }
    }

    /// Return the index into the operations table of an operation identified by `op_handle`.
    fn op_index(&self, op_handle: OpHandle) -> Result<usize, Error> {
        self.operations
            .iter()
            .position(|op| match op {
                Some(op) => op.handle == op_handle,
                None => false,
            })
            .ok_or_else(|| {
                km_err!(InvalidOperationHandle, "operation handle {:?} not found", op_handle)
            })
    }

    /// Execute the provided lambda over the associated [`Operation`] once its key is still
    /// authorized.  Any failure destroys the operation.
    fn with_authed_operation<F, T>(&mut self, op_handle: OpHandle, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Operation) -> Result<T, Error>,
    {
        let op_idx = self.op_index(op_handle)?;
        let now = self.ctx.now();
        let result = match &mut self.operations[op_idx] {
            Some(op) => self
                .enforcement
                .authorize_update(op.algorithm, op.purpose, &op.auths, now)
                .and_then(|()| f(op)),
            None => Err(km_err!(InvalidOperationHandle, "operation {:?} vanished", op_handle)),
        };
        if result.is_err() {
            self.operations[op_idx] = None;
        }
        result
    }

    fn take_operation(&mut self, op_handle: OpHandle) -> Result<Operation, Error> {
        let op_idx = self.op_index(op_handle)?;
        self.operations[op_idx].take().ok_or_else(|| {
            km_err!(InvalidOperationHandle, "operation handle {:?} not found", op_handle)
        })
    }
}
