//! Authorization of key use against a key's characteristics.

use skm_common::{
    contains_tag_value, get_bool_tag_value, get_opt_tag_value, km_err, tag,
    wire::keymint::{Algorithm, DateTime, KeyParam, KeyPurpose},
    Error,
};

/// Maximum number of keys whose last access time can be tracked.
const MAX_ACCESS_TIMED_KEYS: usize = 32;

/// Maximum number of keys whose use count can be tracked.
const MAX_USE_COUNTED_KEYS: usize = 32;

/// Identifier for a key blob, used to track per-key state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct KeyId(pub [u8; 8]);

/// Time of the last authorized use of a key.
struct AccessTime {
    key_id: KeyId,
    last_access: DateTime,
}

/// Per-key use count.
struct UseCount {
    key_id: KeyId,
    count: u64,
}

/// Tracking-table updates for an authorized begin, applied with [`Enforcement::record_use`]
/// once the operation has been created.
#[derive(Debug)]
#[must_use]
pub(crate) struct PendingUse {
    key_id: KeyId,
    now: DateTime,
    access_slot: Option<usize>,
    use_slot: Option<usize>,
}

/// Enforcement state: tracking tables for rate-limited and use-limited keys.
pub(crate) struct Enforcement {
    access_times: [Option<AccessTime>; MAX_ACCESS_TIMED_KEYS],
    use_count: [Option<UseCount>; MAX_USE_COUNTED_KEYS],
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            access_times: core::array::from_fn(|_| None),
            use_count: core::array::from_fn(|_| None),
        }
    }
}

impl Enforcement {
    /// Authorize the start of an operation with `purpose` on a key with characteristics `auths`,
    /// given the begin `params`.  Tracking tables are left alone; the returned [`PendingUse`]
    /// must be passed to [`Enforcement::record_use`] once the operation exists.
    pub fn authorize_begin(
        &self,
        key_id: KeyId,
        algorithm: Algorithm,
        purpose: KeyPurpose,
        auths: &[KeyParam],
        params: &[KeyParam],
        now: DateTime,
    ) -> Result<PendingUse, Error> {
        let mut pending = PendingUse { key_id, now, access_slot: None, use_slot: None };
        if tag::is_public_key_operation(algorithm, purpose) {
            return Ok(pending);
        }
        if !tag::purpose_supported(algorithm, purpose) {
            return Err(km_err!(
                UnsupportedPurpose,
                "purpose {:?} not supported for {:?}",
                purpose,
                algorithm
            ));
        }
        if !contains_tag_value!(auths, Purpose, purpose) {
            return Err(km_err!(IncompatiblePurpose, "purpose {:?} not authorized", purpose));
        }
        check_validity(auths, purpose, now)?;

        if matches!(purpose, KeyPurpose::Encrypt | KeyPurpose::Sign)
            && get_opt_tag_value!(params, Nonce)?.is_some()
            && !get_bool_tag_value!(auths, CallerNonce)?
        {
            return Err(km_err!(CallerNonceProhibited, "caller nonce not authorized for key"));
        }
        check_user_auth(auths)?;

        if let Some(min_secs) = get_opt_tag_value!(auths, MinSecondsBetweenOps)? {
            pending.access_slot = Some(self.check_access_time(key_id, *min_secs, now)?);
        }
        if let Some(max_uses) = get_opt_tag_value!(auths, MaxUsesPerBoot)? {
            pending.use_slot = Some(self.check_use_count(key_id, *max_uses)?);
        }
        Ok(pending)
    }

    /// Record the use of a key whose begin was authorized and has now succeeded.
    pub fn record_use(&mut self, pending: PendingUse) {
        let PendingUse { key_id, now, access_slot, use_slot } = pending;
        if let Some(idx) = access_slot {
            self.access_times[idx] = Some(AccessTime { key_id, last_access: now });
        }
        if let Some(idx) = use_slot {
            match &mut self.use_count[idx] {
                Some(c) => c.count += 1,
                None => self.use_count[idx] = Some(UseCount { key_id, count: 1 }),
            }
        }
    }

    /// Authorize continuation (update or finish) of an operation that has already begun.
    pub fn authorize_update(
        &self,
        algorithm: Algorithm,
        purpose: KeyPurpose,
        auths: &[KeyParam],
        now: DateTime,
    ) -> Result<(), Error> {
        if tag::is_public_key_operation(algorithm, purpose) {
            return Ok(());
        }
        check_validity(auths, purpose, now)?;
        check_user_auth(auths)
    }

    /// Find the access-time slot for `key_id`, failing if the key was used less than
    /// `min_secs` seconds ago.
    fn check_access_time(
        &self,
        key_id: KeyId,
        min_secs: u32,
        now: DateTime,
    ) -> Result<usize, Error> {
        let mut free_idx = None;
        for (idx, slot) in self.access_times.iter().enumerate() {
            match slot {
                Some(a) if a.key_id == key_id => {
                    let elapsed = now.ms_since_epoch.saturating_sub(a.last_access.ms_since_epoch);
                    if elapsed < (min_secs as i64) * 1000 {
                        return Err(km_err!(
                            KeyRateLimitExceeded,
                            "key used {} ms ago, minimum interval {} s",
                            elapsed,
                            min_secs
                        ));
                    }
                    return Ok(idx);
                }
                Some(_) => {}
                None if free_idx.is_none() => free_idx = Some(idx),
                None => {}
            }
        }
        free_idx.ok_or_else(|| km_err!(TooManyOperations, "too many rate-limited keys in play"))
    }

    /// Find the use-count slot for `key_id`, failing if `max_uses` is already reached.
    fn check_use_count(&self, key_id: KeyId, max_uses: u32) -> Result<usize, Error> {
        let mut free_idx = None;
        for (idx, slot) in self.use_count.iter().enumerate() {
            match slot {
                Some(c) if c.key_id == key_id => {
                    if c.count >= max_uses as u64 {
                        return Err(km_err!(
                            KeyMaxOpsExceeded,
                            "use count {} >= limit {}",
                            c.count,
                            max_uses
                        ));
                    }
                    return Ok(idx);
                }
                Some(_) => {}
                None if free_idx.is_none() => free_idx = Some(idx),
                None => {}
            }
        }
        free_idx.ok_or_else(|| km_err!(TooManyOperations, "too many use-counted keys in play"))
    }
}

/// Check the validity period of a key for an operation with `purpose` at time `now`.
fn check_validity(auths: &[KeyParam], purpose: KeyPurpose, now: DateTime) -> Result<(), Error> {
    if let Some(active) = get_opt_tag_value!(auths, ActiveDatetime)? {
        if now < *active {
            return Err(km_err!(KeyNotYetValid, "key not active until {:?}", active));
        }
    }
    let expiry = match purpose {
        KeyPurpose::Encrypt | KeyPurpose::Sign => {
            get_opt_tag_value!(auths, OriginationExpireDatetime)?
        }
        KeyPurpose::Decrypt | KeyPurpose::Verify => get_opt_tag_value!(auths, UsageExpireDatetime)?,
        KeyPurpose::WrapKey => None,
    };
    if let Some(expiry) = expiry {
        if now > *expiry {
            return Err(km_err!(KeyExpired, "key expired at {:?}", expiry));
        }
    }
    Ok(())
}

/// Keys bound to a user need an authentication token, which is never available here.
fn check_user_auth(auths: &[KeyParam]) -> Result<(), Error> {
    let bound = auths.iter().any(|p| matches!(p, KeyParam::UserSecureId(_)));
    if bound && !get_bool_tag_value!(auths, NoAuthRequired)? {
        return Err(km_err!(KeyUserNotAuthenticated, "key requires user authentication"));
    }
    Ok(())
}
