//! Start-of-day configuration for the soft Keymaster, loadable from TOML.
//!
//! ```toml
//! os_version = 110000
//! os_patchlevel = 202310
//! blob_format = "auth-encrypted"
//! security_level = "software"
//! reseed_interval = 65536
//! max_operations = 16
//! supports_device_id_attestation = true
//!
//! [attestation_ids]
//! brand = "generic"
//! model = "soft"
//!
//! [root_of_trust]
//! verified_boot_key = "00112233..."
//! device_locked = false
//! verified_boot_state = "unverified"
//!
//! [batch]
//! key = "308204be..."   # PKCS#8 RSA private key
//! cert = "30820301..."  # X.509 certificate
//! ```

use serde::{Deserialize, Deserializer};
use skm_common::{
    km_err,
    wire::keymint::{SecurityLevel, VerifiedBootState},
    Error,
};

/// Default number of RNG output bytes between reseeds.
pub const DEFAULT_RESEED_INTERVAL: u64 = 64 * 1024;

/// Default size of the operation table.
pub const DEFAULT_MAX_OPERATIONS: usize = 16;

/// Decode a hex string field.
fn hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    hex::decode(s.trim()).map_err(serde::de::Error::custom)
}

/// Overall configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KeymasterConfig {
    /// OS version reported into the software-enforced authorizations of new keys.
    pub os_version: u32,
    /// OS patchlevel (YYYYMM) reported into the software-enforced authorizations of new keys.
    pub os_patchlevel: u32,
    /// Layout used for newly created key blobs.
    pub blob_format: BlobFormat,
    /// Security level reported in attestation records.
    pub security_level: AttestedSecurityLevel,
    /// Bytes of RNG output after which the RNG is reseeded from the entropy source.
    pub reseed_interval: u64,
    /// Number of operations that may be in flight at once.
    pub max_operations: usize,
    pub supports_device_id_attestation: bool,
    pub attestation_ids: Option<AttestationIds>,
    pub root_of_trust: RootOfTrustConfig,
    pub batch: Option<BatchConfig>,
}

impl Default for KeymasterConfig {
    fn default() -> Self {
        Self {
            os_version: 0,
            os_patchlevel: 0,
            blob_format: BlobFormat::default(),
            security_level: AttestedSecurityLevel::default(),
            reseed_interval: DEFAULT_RESEED_INTERVAL,
            max_operations: DEFAULT_MAX_OPERATIONS,
            supports_device_id_attestation: false,
            attestation_ids: None,
            root_of_trust: RootOfTrustConfig::default(),
            batch: None,
        }
    }
}

impl KeymasterConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml(data: &str) -> Result<Self, Error> {
        let config: KeymasterConfig = toml::from_str(data)
            .map_err(|e| km_err!(InvalidArgument, "failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that deserialization alone cannot.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_operations == 0 {
            return Err(km_err!(InvalidArgument, "max_operations must be non-zero"));
        }
        if self.reseed_interval == 0 {
            return Err(km_err!(InvalidArgument, "reseed_interval must be non-zero"));
        }
        if self.supports_device_id_attestation && self.attestation_ids.is_none() {
            return Err(km_err!(
                InvalidArgument,
                "device ID attestation enabled without [attestation_ids]"
            ));
        }
        Ok(())
    }
}

/// Key blob layout for new keys.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlobFormat {
    #[default]
    AuthEncrypted,
    IntegrityAssured,
}

/// Security level claimed by attestation records.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AttestedSecurityLevel {
    #[default]
    Software,
    TrustedEnvironment,
}

impl From<AttestedSecurityLevel> for SecurityLevel {
    fn from(level: AttestedSecurityLevel) -> SecurityLevel {
        match level {
            AttestedSecurityLevel::Software => SecurityLevel::Software,
            AttestedSecurityLevel::TrustedEnvironment => SecurityLevel::TrustedEnvironment,
        }
    }
}

/// Device identifiers that may be attested.  Empty values are never attested.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AttestationIds {
    pub brand: String,
    pub device: String,
    pub product: String,
    pub serial: String,
    pub imei: String,
    pub meid: String,
    pub manufacturer: String,
    pub model: String,
}

/// Verified boot information reported in attestation records.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RootOfTrustConfig {
    #[serde(deserialize_with = "hex_bytes")]
    pub verified_boot_key: Vec<u8>,
    pub device_locked: bool,
    pub verified_boot_state: BootState,
}

impl Default for RootOfTrustConfig {
    fn default() -> Self {
        Self {
            verified_boot_key: vec![0; 32],
            device_locked: false,
            verified_boot_state: BootState::Unverified,
        }
    }
}

/// Verified boot state, as written in configuration.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BootState {
    Verified,
    SelfSigned,
    Unverified,
    Failed,
}

impl From<BootState> for VerifiedBootState {
    fn from(state: BootState) -> VerifiedBootState {
        match state {
            BootState::Verified => VerifiedBootState::Verified,
            BootState::SelfSigned => VerifiedBootState::SelfSigned,
            BootState::Unverified => VerifiedBootState::Unverified,
            BootState::Failed => VerifiedBootState::Failed,
        }
    }
}

/// Provisioned batch attestation key and certificate.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// PKCS#8 DER encoding of an RSA private key.
    #[serde(deserialize_with = "hex_bytes")]
    pub key: Vec<u8>,
    /// DER encoding of the X.509 certificate for `key`.
    #[serde(deserialize_with = "hex_bytes")]
    pub cert: Vec<u8>,
}

/// Manual implementation of [`Debug`] that skips emitting the private key.
impl core::fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchConfig")
            .field("key", &"...")
            .field("cert", &hex::encode(&self.cert))
            .finish()
    }
}
