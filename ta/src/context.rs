//! Key management context: crypto implementations, RNG reseeding, the master key, and the
//! placement of key authorizations into hardware-enforced and software-enforced sets.

use crate::{
    cert::BatchSigner,
    clock::Clock,
    config::{BlobFormat, KeymasterConfig},
    enforcement::KeyId,
    keys::{
        AesKeyFactory, HmacKeyFactory, Key, KeyCharacteristics, KeyCreationResult, KeyFactory,
        RsaKeyFactory,
    },
};
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use core::cmp::Ordering;
use log::{debug, error, warn};
use skm_common::{
    crypto::{self, aes, EntropySource, KeyMaterial, Rng},
    keyblob,
    keyblob::PlaintextKeyBlob,
    km_err, tag,
    tag::AuthorizationSet,
    try_to_vec, vec_try_with_capacity,
    wire::keymint::{Algorithm, DateTime, ErrorCode, KeyOrigin, KeyParam, Tag},
    Error, FallibleAllocExt,
};
use std::sync::{Mutex, OnceLock};
use zeroize::Zeroizing;

/// Fixed root-of-trust marker mixed into the hidden authorizations of every key blob.
pub const ROOT_OF_TRUST_MARKER: &[u8] = b"SW";

/// Number of entropy bytes drawn on each reseed.
const RESEED_LEN: usize = 32;

/// Period over which unique IDs are stable: 30 days, in milliseconds.
const UNIQUE_ID_PERIOD_MS: i64 = 2_592_000_000;

/// Length of a unique ID in bytes.
const UNIQUE_ID_LEN: usize = 16;

/// Label for deriving the unique-ID HMAC key from the master key.
const UNIQUE_ID_KEY_LABEL: &[u8] = b"SoftKeymasterUniqueId";

/// Source of the master key that protects key blobs.
pub trait MasterKeySource: Send + Sync {
    /// Return the master key.
    fn master_key(&self) -> Result<aes::Key, Error>;
}

/// Master key source that yields a fixed all-zero AES-256 key.  Key blobs protected under it
/// have integrity but no real confidentiality.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroMasterKey;

impl MasterKeySource for ZeroMasterKey {
    fn master_key(&self) -> Result<aes::Key, Error> {
        Ok(aes::Key::Aes256([0; 32]))
    }
}

/// RNG wrapper that seeds from an entropy source before first use and reseeds after every
/// `reseed_interval` bytes of output.
pub(crate) struct ReseedingRng {
    rng: Box<dyn Rng + Send>,
    entropy: Box<dyn EntropySource + Send>,
    reseed_interval: u64,
    since_reseed: u64,
    seeded: bool,
}

impl ReseedingRng {
    pub fn new(
        rng: Box<dyn Rng + Send>,
        entropy: Box<dyn EntropySource + Send>,
        reseed_interval: u64,
    ) -> Self {
        Self { rng, entropy, reseed_interval, since_reseed: 0, seeded: false }
    }

    fn reseed(&mut self) -> Result<(), Error> {
        let mut seed = Zeroizing::new([0u8; RESEED_LEN]);
        self.entropy.fill_entropy(&mut seed[..]).map_err(|e| {
            error!("RNG reseed failed: {:?}", e);
            km_err!(UnknownError, "failed to reseed RNG: {:?}", e)
        })?;
        self.rng.add_entropy(&seed[..]);
        self.since_reseed = 0;
        self.seeded = true;
        debug!("RNG reseeded after {} byte interval", self.reseed_interval);
        Ok(())
    }
}

impl Rng for ReseedingRng {
    fn add_entropy(&mut self, data: &[u8]) {
        self.rng.add_entropy(data)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        if !self.seeded || self.since_reseed >= self.reseed_interval {
            self.reseed()?;
        }
        self.rng.fill_bytes(dest)?;
        self.since_reseed = self.since_reseed.saturating_add(dest.len() as u64);
        Ok(())
    }
}

/// Where an authorization ends up when a key blob is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Hardware,
    Software,
    /// Not recorded in the key blob.
    Dropped,
    /// Not allowed in a key creation request.
    Forbidden,
}

fn placement(param: &KeyParam) -> Placement {
    match param {
        KeyParam::Nonce(_)
        | KeyParam::MacLength(_)
        | KeyParam::AssociatedData(_)
        | KeyParam::UniqueId(_)
        | KeyParam::BootloaderOnly => Placement::Forbidden,

        // Hidden, or added by the context itself.
        KeyParam::ApplicationId(_)
        | KeyParam::ApplicationData(_)
        | KeyParam::RootOfTrust(_)
        | KeyParam::Origin(_)
        | KeyParam::OsVersion(_)
        | KeyParam::OsPatchlevel(_)
        | KeyParam::AttestationChallenge(_)
        | KeyParam::AttestationApplicationId(_)
        | KeyParam::AttestationIdBrand(_)
        | KeyParam::AttestationIdDevice(_)
        | KeyParam::AttestationIdProduct(_)
        | KeyParam::AttestationIdSerial(_)
        | KeyParam::AttestationIdImei(_)
        | KeyParam::AttestationIdMeid(_)
        | KeyParam::AttestationIdManufacturer(_)
        | KeyParam::AttestationIdModel(_)
        | KeyParam::ResetSinceIdRotation => Placement::Dropped,

        KeyParam::ActiveDatetime(_)
        | KeyParam::OriginationExpireDatetime(_)
        | KeyParam::UsageExpireDatetime(_)
        | KeyParam::CreationDatetime(_)
        | KeyParam::MinSecondsBetweenOps(_)
        | KeyParam::MaxUsesPerBoot(_)
        | KeyParam::UserId(_)
        | KeyParam::AllApplications
        | KeyParam::AllowWhileOnBody => Placement::Software,

        KeyParam::Purpose(_)
        | KeyParam::Algorithm(_)
        | KeyParam::KeySize(_)
        | KeyParam::BlockMode(_)
        | KeyParam::Digest(_)
        | KeyParam::Padding(_)
        | KeyParam::CallerNonce
        | KeyParam::MinMacLength(_)
        | KeyParam::EcCurve(_)
        | KeyParam::RsaPublicExponent(_)
        | KeyParam::IncludeUniqueId
        | KeyParam::UserSecureId(_)
        | KeyParam::NoAuthRequired
        | KeyParam::UserAuthType(_)
        | KeyParam::AuthTimeout(_) => Placement::Hardware,
    }
}

/// Shared state for key creation, key loading and attestation.
pub(crate) struct KeymasterContext {
    pub config: KeymasterConfig,
    pub aes: Box<dyn crypto::Aes + Send + Sync>,
    pub hmac: Box<dyn crypto::Hmac + Send + Sync>,
    pub rsa: Box<dyn crypto::Rsa + Send + Sync>,
    pub sha256: Box<dyn crypto::Sha256 + Send + Sync>,
    pub compare: Box<dyn crypto::ConstTimeEq + Send + Sync>,
    rng: Mutex<ReseedingRng>,
    master_key_source: Box<dyn MasterKeySource>,
    master_key: OnceLock<aes::Key>,
    clock: Box<dyn Clock>,
    batch: OnceLock<BatchSigner>,
    factories: BTreeMap<Algorithm, Box<dyn KeyFactory>>,
}

impl KeymasterContext {
    pub fn new(
        config: KeymasterConfig,
        imp: crypto::Implementation,
        master_key_source: Box<dyn MasterKeySource>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let crypto::Implementation { rng, entropy, compare, aes, hmac, rsa, sha256 } = imp;
        let mut factories: BTreeMap<Algorithm, Box<dyn KeyFactory>> = BTreeMap::new();
        for factory in [
            Box::new(AesKeyFactory::default()) as Box<dyn KeyFactory>,
            Box::new(HmacKeyFactory::default()),
            Box::new(RsaKeyFactory::default()),
        ] {
            factories.insert(factory.algorithm(), factory);
        }
        Self {
            rng: Mutex::new(ReseedingRng::new(rng, entropy, config.reseed_interval)),
            config,
            aes,
            hmac,
            rsa,
            sha256,
            compare,
            master_key_source,
            master_key: OnceLock::new(),
            clock,
            batch: OnceLock::new(),
            factories,
        }
    }

    /// Run `f` with exclusive access to the RNG.
    pub fn with_rng<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Rng) -> Result<T, Error>,
    {
        let mut rng = self.rng.lock().map_err(|_e| km_err!(UnknownError, "RNG lock poisoned"))?;
        f(&mut *rng)
    }

    pub fn now(&self) -> DateTime {
        self.clock.now()
    }

    /// Return the key factory for `algorithm`.
    pub fn factory(&self, algorithm: Algorithm) -> Result<&dyn KeyFactory, Error> {
        self.factories
            .get(&algorithm)
            .map(|f| f.as_ref())
            .ok_or_else(|| km_err!(UnsupportedAlgorithm, "algorithm {:?} not supported", algorithm))
    }

    /// Algorithms that have a registered factory.
    pub fn algorithms(&self) -> impl Iterator<Item = Algorithm> + '_ {
        self.factories.keys().copied()
    }

    /// Update the OS version and patchlevel that new and loaded keys are bound to.
    pub fn configure(&mut self, os_version: u32, os_patchlevel: u32) {
        self.config.os_version = os_version;
        self.config.os_patchlevel = os_patchlevel;
    }

    /// Return the master key, fetching it from its source on first use.
    fn master_key(&self) -> Result<&aes::Key, Error> {
        if let Some(key) = self.master_key.get() {
            return Ok(key);
        }
        let key = self.master_key_source.master_key()?;
        Ok(self.master_key.get_or_init(|| key))
    }

    /// Return the batch attestation signer, loading or generating it on first use.
    pub fn batch(&self) -> Result<&BatchSigner, Error> {
        if let Some(signer) = self.batch.get() {
            return Ok(signer);
        }
        let signer = match &self.config.batch {
            Some(batch) => BatchSigner::from_config(self, batch)?,
            None => BatchSigner::generate(self)?,
        };
        Ok(self.batch.get_or_init(|| signer))
    }

    /// Split the authorizations of a key creation request into hardware-enforced and
    /// software-enforced sets, adding the origin, OS version and patchlevel, and the creation
    /// time if the request did not hold one.
    pub fn partition(
        &self,
        params: &[KeyParam],
        origin: KeyOrigin,
    ) -> Result<(AuthorizationSet, AuthorizationSet), Error> {
        let mut hw_enforced = AuthorizationSet::new();
        let mut sw_enforced = AuthorizationSet::new();
        for param in params {
            match placement(param) {
                Placement::Hardware => hw_enforced.push(param.clone())?,
                Placement::Software => sw_enforced.push(param.clone())?,
                Placement::Dropped => {}
                Placement::Forbidden => {
                    return Err(km_err!(
                        InvalidKeyBlob,
                        "tag {:?} not allowed in key creation",
                        param.tag()
                    ))
                }
            }
        }
        hw_enforced.push(KeyParam::Origin(origin))?;
        sw_enforced.push(KeyParam::OsVersion(self.config.os_version))?;
        sw_enforced.push(KeyParam::OsPatchlevel(self.config.os_patchlevel))?;
        if !sw_enforced.contains_tag(Tag::CreationDatetime) {
            sw_enforced.push(KeyParam::CreationDatetime(self.now()))?;
        }
        Ok((hw_enforced, sw_enforced))
    }

    /// Build the key blob for freshly generated or imported key material.
    pub fn create_key_blob(
        &self,
        params: &[KeyParam],
        origin: KeyOrigin,
        key_material: &KeyMaterial,
    ) -> Result<KeyCreationResult, Error> {
        let (hw_enforced, sw_enforced) = self.partition(params, origin)?;
        let plaintext = PlaintextKeyBlob {
            key_material: Zeroizing::new(try_to_vec(key_material.raw())?),
            hw_enforced,
            sw_enforced,
        };
        let hidden = tag::hidden(params, ROOT_OF_TRUST_MARKER)?;
        let key_blob = self.encode_key_blob(&plaintext, &hidden)?;
        let PlaintextKeyBlob { hw_enforced, sw_enforced, .. } = plaintext;
        Ok(KeyCreationResult {
            key_blob,
            characteristics: KeyCharacteristics { hw_enforced, sw_enforced },
        })
    }

    /// Encode a plaintext key blob in the configured layout.
    pub fn encode_key_blob(
        &self,
        plaintext: &PlaintextKeyBlob,
        hidden: &AuthorizationSet,
    ) -> Result<Vec<u8>, Error> {
        match self.config.blob_format {
            BlobFormat::AuthEncrypted => {
                let master_key = self.master_key()?;
                self.with_rng(|rng| {
                    keyblob::encrypt(
                        &*self.aes,
                        &*self.sha256,
                        rng,
                        master_key,
                        plaintext,
                        hidden,
                    )
                })
            }
            BlobFormat::IntegrityAssured => {
                keyblob::integrity_assure(&*self.hmac, plaintext, hidden)
            }
        }
    }

    /// Decode a key blob of either layout, using the application ID and data in `params` as
    /// hidden authorizations.  No version checks are applied.
    pub fn decode_key_blob(
        &self,
        key_blob: &[u8],
        params: &[KeyParam],
    ) -> Result<PlaintextKeyBlob, Error> {
        let hidden = tag::hidden(params, ROOT_OF_TRUST_MARKER)?;
        let master_key = self.master_key()?;
        keyblob::decrypt(
            &*self.aes,
            &*self.sha256,
            &*self.hmac,
            &*self.compare,
            master_key,
            key_blob,
            &hidden,
        )
    }

    /// Check the OS version and patchlevel a key is bound to against the current values.
    pub fn check_versions(&self, plaintext: &PlaintextKeyBlob) -> Result<(), Error> {
        fn check(v: u32, curr: u32, name: &str) -> Result<(), Error> {
            match v.cmp(&curr) {
                Ordering::Less => Err(km_err!(
                    KeyRequiresUpgrade,
                    "keyblob with old {} {} needs upgrade to current {}",
                    name,
                    v,
                    curr
                )),
                Ordering::Equal => Ok(()),
                Ordering::Greater => Err(km_err!(
                    InvalidKeyBlob,
                    "keyblob with future {} {} (current {})",
                    name,
                    v,
                    curr
                )),
            }
        }

        for param in plaintext.hw_enforced.iter().chain(plaintext.sw_enforced.iter()) {
            match param {
                KeyParam::OsVersion(v) => {
                    if self.config.os_version == 0 {
                        // Moving to OS version zero is always an upgrade.
                        if *v != 0 {
                            warn!("requesting upgrade to OS version 0");
                            return Err(km_err!(
                                KeyRequiresUpgrade,
                                "keyblob with OS version {} needs upgrade to current version 0",
                                v
                            ));
                        }
                    } else {
                        check(*v, self.config.os_version, "OS version")?;
                    }
                }
                KeyParam::OsPatchlevel(v) => {
                    check(*v, self.config.os_patchlevel, "OS patchlevel")?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Decode, version-check and load a key blob.
    pub fn parse_key_blob(&self, key_blob: &[u8], params: &[KeyParam]) -> Result<Key, Error> {
        let plaintext = self.decode_key_blob(key_blob, params)?;
        self.check_versions(&plaintext)?;
        let algorithm = tag::get_algorithm(&plaintext.hw_enforced)?;
        self.factory(algorithm)?.load_key(plaintext)
    }

    /// Rebind an out-of-date key blob to the current OS version and patchlevel.  A blob that is
    /// already current is returned as-is.
    pub fn upgrade_key_blob(&self, key_blob: &[u8], params: &[KeyParam]) -> Result<Vec<u8>, Error> {
        let mut plaintext = self.decode_key_blob(key_blob, params)?;
        match self.check_versions(&plaintext) {
            Ok(()) => return Ok(try_to_vec(key_blob)?),
            Err(e) if e.code() == ErrorCode::KeyRequiresUpgrade => {}
            Err(e) => return Err(e),
        }
        for set in [&mut plaintext.hw_enforced, &mut plaintext.sw_enforced] {
            set.remove_all(Tag::OsVersion);
            set.remove_all(Tag::OsPatchlevel);
        }
        plaintext.sw_enforced.push(KeyParam::OsVersion(self.config.os_version))?;
        plaintext.sw_enforced.push(KeyParam::OsPatchlevel(self.config.os_patchlevel))?;
        let hidden = tag::hidden(params, ROOT_OF_TRUST_MARKER)?;
        self.encode_key_blob(&plaintext, &hidden)
    }

    /// Identifier for a key blob, used for per-key enforcement state.
    pub fn key_id(&self, key_blob: &[u8]) -> Result<KeyId, Error> {
        let digest = self.sha256.hash(key_blob)?;
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        Ok(KeyId(id))
    }

    /// Derive the unique ID for a key created at `creation`, on behalf of `app_id`:
    ///
    /// ```text
    /// HMAC-SHA256(K, period:u64be || app_id || reset:u8)[..16]
    /// ```
    ///
    /// where `period` is the number of whole 30-day periods since the epoch and `K` is derived
    /// from the master key.
    pub fn unique_id(
        &self,
        creation: DateTime,
        app_id: &[u8],
        reset_since_rotation: bool,
    ) -> Result<Vec<u8>, Error> {
        let master_key = self.master_key()?;
        let id_key = Zeroizing::new(crypto::hmac_sha256(
            &*self.hmac,
            master_key.as_slice(),
            UNIQUE_ID_KEY_LABEL,
        )?);
        let period = (creation.ms_since_epoch.max(0) / UNIQUE_ID_PERIOD_MS) as u64;

        let mut input = vec_try_with_capacity!(8 + app_id.len() + 1)?;
        input.try_extend_from_slice(&period.to_be_bytes())?;
        input.try_extend_from_slice(app_id)?;
        input.try_push(u8::from(reset_since_rotation))?;

        let mut id = crypto::hmac_sha256(&*self.hmac, &id_key, &input)?;
        id.truncate(UNIQUE_ID_LEN);
        Ok(id)
    }
}
