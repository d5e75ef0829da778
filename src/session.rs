//! Session layer: per-operation configuration and dispatch against the key
//! store and trust engine, with synchronous and start/wait execution.

use crate::armor::{self, ArmorError, ArmorKind};
use crate::engine::{Backend, BackendError, EngineConfig, EngineInfo, ErrorCode, LoopbackBackend};
use crate::key::{Fingerprint, Key, KeyError, KeyHandle, Subkey};
use crate::lifecycle::{self, LifecycleError};
use crate::packet::{self, EncodeOptions, PacketError};
use crate::store::{KeyStore, StoreError};
use crate::trust::TrustEngine;
use crate::types::{
    CertifyFlags, CreateFlags, DeleteFlags, ExportMode, KeyCapabilities, KeylistMode,
    PinentryMode, Protocol, TrustInput, TrustLevel,
};
use crate::userid::{TofuStats, UserId};
use jiff::Timestamp;
use serde::Serialize;
use snafu::Snafu;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("session already released"))]
    ContextReleased,
    #[snafu(display("another operation is already pending"))]
    OperationInProgress,
    #[snafu(display("this engine does not speak {protocol:?}"))]
    UnsupportedProtocol { protocol: Protocol },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Lifecycle { source: LifecycleError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Packet { source: PacketError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Armor { source: ArmorError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Backend { source: BackendError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    InvalidKey { source: KeyError },
    #[snafu(display("writing to export sink"))]
    Sink { source: std::io::Error },
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    OperationPending,
    Released,
}

/// Import statistics, as counts over the considered material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ImportResult {
    pub considered: u32,
    pub imported: u32,
    pub unchanged: u32,
    pub not_imported: u32,
    pub secret_imported: u32,
}

/// Result of a resolved asynchronous operation.
#[derive(Debug)]
pub enum OpResult {
    Key(Key),
    Export(Vec<u8>),
    Import(ImportResult),
}

enum PendingOp {
    GenerateKey {
        userid: String,
        algorithm: String,
        expires: u64,
        flags: CreateFlags,
    },
    Export {
        pattern: Option<String>,
        mode: ExportMode,
    },
    Import {
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificationRecord {
    pub signer: String,
    pub class: crate::types::CertClass,
    #[serde(with = "crate::timestamp::required")]
    pub created_at: Timestamp,
    #[serde(with = "crate::timestamp::optional")]
    pub expires_at: Option<Timestamp>,
    pub exportable: bool,
    pub revoked: bool,
    pub trust_depth: u8,
    pub trust_value: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notations: Option<Vec<crate::certification::Notation>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserIdRecord {
    pub uid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<TrustLevel>,
    pub primary: bool,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tofu: Option<TofuStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certifications: Option<Vec<CertificationRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubkeyRecord {
    pub fingerprint: String,
    pub algorithm: String,
    pub bits: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    #[serde(with = "crate::timestamp::required")]
    pub created_at: Timestamp,
    #[serde(with = "crate::timestamp::optional")]
    pub expires_at: Option<Timestamp>,
    pub capabilities: String,
    pub is_card_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keygrip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_secret: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyRecord {
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v5_fingerprint: Option<String>,
    pub key_id: String,
    pub protocol: Protocol,
    pub owner_trust: TrustLevel,
    pub revoked: bool,
    pub disabled: bool,
    pub invalid: bool,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_secret: Option<bool>,
    pub capabilities: String,
    pub uids: Vec<UserIdRecord>,
    pub subkeys: Vec<SubkeyRecord>,
}

type ProgressCallback = Box<dyn FnMut(&str, u64, u64) + Send>;
type StatusCallback = Box<dyn FnMut(&str, &str) + Send>;

/// One caller's view of the engine. A session is exclusively owned by one
/// execution context; concurrent sessions coordinate through the store's
/// per-fingerprint locking.
pub struct Session {
    store: Arc<KeyStore>,
    trust: Arc<TrustEngine>,
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    state: SessionState,
    pending: Option<PendingOp>,
    armor: bool,
    offline: bool,
    text_mode: bool,
    keylist_mode: KeylistMode,
    pinentry_mode: PinentryMode,
    protocol: Protocol,
    include_certs: i32,
    signers: Vec<Fingerprint>,
    progress: Option<ProgressCallback>,
    status: Option<StatusCallback>,
}

impl Session {
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self::with_backend(store, Arc::new(LoopbackBackend::default()))
    }

    pub fn with_backend(store: Arc<KeyStore>, backend: Arc<dyn Backend>) -> Self {
        Self {
            store,
            trust: Arc::new(TrustEngine::default()),
            backend,
            config: EngineConfig::default(),
            state: SessionState::Open,
            pending: None,
            armor: false,
            offline: false,
            text_mode: false,
            keylist_mode: KeylistMode::default(),
            pinentry_mode: PinentryMode::default(),
            protocol: Protocol::OpenPgp,
            include_certs: 0,
            signers: Vec::new(),
            progress: None,
            status: None,
        }
    }

    pub fn with_trust_engine(mut self, trust: Arc<TrustEngine>) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine_info(&self) -> EngineInfo {
        self.backend.engine_info()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::OperationPending => Err(SessionError::OperationInProgress),
            SessionState::Released => Err(SessionError::ContextReleased),
        }
    }

    fn check_protocol(&self) -> Result<(), SessionError> {
        if self.protocol != Protocol::OpenPgp {
            return Err(SessionError::UnsupportedProtocol {
                protocol: self.protocol,
            });
        }
        Ok(())
    }

    // configuration

    pub fn set_armor(&mut self, armor: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.armor = armor;
        Ok(())
    }

    pub fn armor(&self) -> bool {
        self.armor
    }

    pub fn set_offline(&mut self, offline: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.offline = offline;
        Ok(())
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn set_text_mode(&mut self, text_mode: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.text_mode = text_mode;
        Ok(())
    }

    pub fn text_mode(&self) -> bool {
        self.text_mode
    }

    pub fn set_keylist_mode(&mut self, mode: KeylistMode) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.keylist_mode = mode;
        Ok(())
    }

    pub fn keylist_mode(&self) -> KeylistMode {
        self.keylist_mode
    }

    pub fn set_pinentry_mode(&mut self, mode: PinentryMode) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.pinentry_mode = mode;
        Ok(())
    }

    pub fn set_protocol(&mut self, protocol: Protocol) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_include_certs(&mut self, count: i32) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.include_certs = count;
        Ok(())
    }

    pub fn include_certs(&self) -> i32 {
        self.include_certs
    }

    pub fn add_signer(&mut self, handle: &KeyHandle) -> Result<(), SessionError> {
        self.ensure_open()?;
        let fingerprint = self.store.resolve(handle)?;
        if !self.signers.contains(&fingerprint) {
            self.signers.push(fingerprint);
        }
        Ok(())
    }

    pub fn clear_signers(&mut self) {
        self.signers.clear();
    }

    pub fn signers(&self) -> &[Fingerprint] {
        &self.signers
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    pub fn set_status_callback(&mut self, callback: StatusCallback) {
        self.status = Some(callback);
    }

    fn emit_progress(&mut self, what: &str, current: u64, total: u64) {
        if let Some(ref mut callback) = self.progress {
            callback(what, current, total);
        }
    }

    fn emit_status(&mut self, keyword: &str, args: &str) {
        if let Some(ref mut callback) = self.status {
            callback(keyword, args);
        }
    }

    /// Release the session. Idempotent; any later operation fails with
    /// `ContextReleased`. Callbacks and signers are dropped here rather
    /// than at some collector-determined point.
    pub fn release(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        log::debug!("releasing session");
        self.pending = None;
        self.signers.clear();
        self.progress = None;
        self.status = None;
        self.state = SessionState::Released;
    }

    // asynchronous execution

    /// Resolve the pending operation, if any. With nothing pending this
    /// returns `Ok(None)` immediately regardless of `hang`; the in-process
    /// backend is always ready, so a pending operation resolves on the
    /// first wait either way.
    pub fn wait(&mut self, hang: bool) -> Result<Option<OpResult>, SessionError> {
        if self.state == SessionState::Released {
            return Err(SessionError::ContextReleased);
        }
        log::trace!("wait(hang={hang})");
        let Some(op) = self.pending.take() else {
            return Ok(None);
        };
        self.state = SessionState::Open;
        let result = match op {
            PendingOp::GenerateKey {
                userid,
                algorithm,
                expires,
                flags,
            } => OpResult::Key(self.generate_key(&userid, &algorithm, expires, flags)?),
            PendingOp::Export { pattern, mode } => {
                OpResult::Export(self.export_keys(pattern.as_deref(), mode)?)
            }
            PendingOp::Import { data } => OpResult::Import(self.import_keys(&data)?),
        };
        Ok(Some(result))
    }

    fn start(&mut self, op: PendingOp) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.pending = Some(op);
        self.state = SessionState::OperationPending;
        Ok(())
    }

    pub fn generate_key_start(
        &mut self,
        userid: &str,
        algorithm: &str,
        expires: u64,
        flags: CreateFlags,
    ) -> Result<(), SessionError> {
        self.start(PendingOp::GenerateKey {
            userid: userid.to_owned(),
            algorithm: algorithm.to_owned(),
            expires,
            flags,
        })
    }

    pub fn export_keys_start(
        &mut self,
        pattern: Option<&str>,
        mode: ExportMode,
    ) -> Result<(), SessionError> {
        self.start(PendingOp::Export {
            pattern: pattern.map(str::to_owned),
            mode,
        })
    }

    pub fn import_keys_start(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.start(PendingOp::Import {
            data: data.to_vec(),
        })
    }

    // operations

    pub fn generate_key(
        &mut self,
        userid: &str,
        algorithm: &str,
        expires: u64,
        flags: CreateFlags,
    ) -> Result<Key, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;
        let key = lifecycle::create_key(
            &self.store,
            self.backend.as_ref(),
            userid,
            algorithm,
            expires,
            flags,
        )?;
        let fingerprint = key.fingerprint().to_string();
        self.emit_status("KEY_CREATED", &fingerprint);
        Ok(key)
    }

    /// List keys matching `pattern`, shaped by the session's keylist mode.
    pub fn keylist(
        &mut self,
        pattern: &str,
        secret_only: bool,
    ) -> Result<Vec<KeyRecord>, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;
        if self
            .keylist_mode
            .intersects(KeylistMode::EXTERN | KeylistMode::FORCE_EXTERN)
        {
            let reason = if self.offline {
                "session is offline"
            } else {
                "external key listing requires a keyserver collaborator"
            };
            return Err(BackendError::new(ErrorCode::GeneralError, reason).into());
        }

        let mut scan = self.store.find_by_pattern(pattern, secret_only);
        let mut keys = Vec::new();
        loop {
            // the backend terminates listing flows with its EOF sentinel,
            // which is an ordinary end of iteration rather than a failure
            match Self::next_listed(&mut scan) {
                Ok(key) => keys.push(key),
                Err(error) if error.is_eof() => break,
                Err(error) => return Err(error.into()),
            }
        }

        let total = keys.len() as u64;
        let mut records = Vec::with_capacity(keys.len());
        for (index, mut key) in keys.into_iter().enumerate() {
            if self
                .keylist_mode
                .intersects(KeylistMode::VALIDATE | KeylistMode::WITH_TOFU)
            {
                self.trust.annotate(&self.store, &mut key);
            }
            records.push(self.key_record(&key));
            self.emit_progress("keylist", index as u64 + 1, total);
        }
        Ok(records)
    }

    fn next_listed(scan: &mut crate::store::PatternScan) -> Result<Key, BackendError> {
        scan.next()
            .ok_or_else(|| BackendError::new(ErrorCode::Eof, "end of keylist"))
    }

    fn key_record(&self, key: &Key) -> KeyRecord {
        let now = Timestamp::now();
        let mode = self.keylist_mode;
        let with_secret = mode.contains(KeylistMode::WITH_SECRET);

        let uids = key
            .userids()
            .iter()
            .map(|uid| self.userid_record(uid, mode))
            .collect();
        let subkeys = key
            .subkeys()
            .iter()
            .map(|subkey| self.subkey_record(subkey, mode))
            .collect();

        KeyRecord {
            fingerprint: key.fingerprint().to_string(),
            v5_fingerprint: mode
                .contains(KeylistMode::WITH_V5FPR)
                .then(|| hex::encode(key.primary_subkey().v5_fingerprint())),
            key_id: key.key_id().to_string(),
            protocol: key.protocol(),
            owner_trust: key.owner_trust(),
            revoked: key.is_revoked(),
            disabled: key.is_disabled(),
            invalid: key.is_invalid(),
            expired: key.is_expired(now),
            has_secret: with_secret.then(|| key.has_secret()),
            capabilities: capabilities_string(key.capabilities(now)),
            uids,
            subkeys,
        }
    }

    fn userid_record(&self, uid: &UserId, mode: KeylistMode) -> UserIdRecord {
        let certifications = mode.contains(KeylistMode::SIGS).then(|| {
            uid.certifications()
                .iter()
                .map(|cert| CertificationRecord {
                    signer: cert.signer().to_string(),
                    class: cert.class(),
                    created_at: cert.created_at(),
                    expires_at: cert.expires_at(),
                    exportable: cert.is_exportable(),
                    revoked: cert.is_revoked(),
                    trust_depth: cert.trust_delegation().0,
                    trust_value: cert.trust_delegation().1,
                    trust_scope: cert.trust_scope().map(str::to_owned),
                    notations: mode
                        .contains(KeylistMode::SIG_NOTATIONS)
                        .then(|| cert.notations().to_vec()),
                })
                .collect()
        });
        UserIdRecord {
            uid: uid.raw().to_owned(),
            name: uid.name().to_owned(),
            comment: uid.comment().map(str::to_owned),
            email: uid.email().to_owned(),
            validity: mode
                .intersects(KeylistMode::VALIDATE | KeylistMode::WITH_TOFU)
                .then(|| uid.validity()),
            primary: uid.is_primary(),
            revoked: uid.is_revoked(),
            tofu: mode
                .contains(KeylistMode::WITH_TOFU)
                .then(|| uid.tofu().cloned().unwrap_or_default()),
            certifications,
        }
    }

    fn subkey_record(&self, subkey: &Subkey, mode: KeylistMode) -> SubkeyRecord {
        SubkeyRecord {
            fingerprint: subkey.fingerprint().to_string(),
            algorithm: subkey.algorithm().to_string(),
            bits: subkey.algorithm().bits(),
            curve: subkey.algorithm().curve().map(str::to_owned),
            created_at: subkey.created_at(),
            expires_at: subkey.expires_at(),
            capabilities: capabilities_string(subkey.capabilities()),
            is_card_key: subkey.is_card_key(),
            keygrip: mode
                .contains(KeylistMode::WITH_KEYGRIP)
                .then(|| subkey.keygrip().to_owned()),
            has_secret: mode
                .contains(KeylistMode::WITH_SECRET)
                .then(|| subkey.has_secret()),
        }
    }

    /// Export matching keys as a packet stream, armored if the session says
    /// so. Secret material never leaves the store.
    pub fn export_keys(
        &mut self,
        pattern: Option<&str>,
        mode: ExportMode,
    ) -> Result<Vec<u8>, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;
        if mode.contains(ExportMode::EXTERN) {
            let reason = if self.offline {
                "session is offline"
            } else {
                "keyserver upload requires a network collaborator"
            };
            return Err(BackendError::new(ErrorCode::GeneralError, reason).into());
        }

        let options = EncodeOptions {
            minimal: mode.contains(ExportMode::MINIMAL),
            ..EncodeOptions::default()
        };
        let mut out = Vec::new();
        let mut exported = Vec::new();
        for key in self.store.find_by_pattern(pattern.unwrap_or(""), false) {
            out.extend(packet::encode_key(&key, options));
            exported.push(key.fingerprint().to_string());
        }
        for fingerprint in exported {
            self.emit_status("EXPORTED", &fingerprint);
        }

        if self.armor {
            Ok(armor::enarmor(ArmorKind::PublicKey, &out).into_bytes())
        } else {
            Ok(out)
        }
    }

    /// Export into a caller-supplied sink instead of a returned buffer.
    pub fn export_keys_to(
        &mut self,
        pattern: Option<&str>,
        mode: ExportMode,
        sink: &mut dyn std::io::Write,
    ) -> Result<(), SessionError> {
        use snafu::ResultExt;

        let bytes = self.export_keys(pattern, mode)?;
        sink.write_all(&bytes).context(SinkSnafu)?;
        Ok(())
    }

    /// Import a packet stream (armored or binary), returning statistics.
    pub fn import_keys(&mut self, data: &[u8]) -> Result<ImportResult, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;

        let binary = match std::str::from_utf8(data) {
            Ok(text) if armor::is_armored(data) => armor::dearmor(text)?.1,
            _ => data.to_vec(),
        };

        let keys = packet::decode_keys(&binary)?;
        let mut result = ImportResult::default();
        for key in keys {
            result.considered += 1;
            if key.userids().is_empty() {
                log::warn!("not importing key {} without user ids", key.fingerprint());
                result.not_imported += 1;
                continue;
            }
            let carries_secret = key
                .subkeys()
                .iter()
                .any(|subkey| subkey.has_secret() || subkey.material.protected);
            if carries_secret {
                result.secret_imported += 1;
            }

            let fingerprint = *key.fingerprint();
            if self.store.contains(&fingerprint) {
                let changed = self
                    .store
                    .with_key_mut(&fingerprint, |existing| {
                        Ok::<bool, std::convert::Infallible>(existing.merge(key))
                    })?
                    .expect("merge is infallible");
                if changed {
                    result.imported += 1;
                } else {
                    result.unchanged += 1;
                }
            } else {
                self.store.insert(key);
                result.imported += 1;
            }
            self.emit_status("IMPORT_OK", &fingerprint.to_string());
        }
        log::info!(
            "import: {} considered, {} imported, {} unchanged",
            result.considered,
            result.imported,
            result.unchanged
        );
        Ok(result)
    }

    /// Certify a key's user ids with the session signers.
    pub fn sign_key(
        &mut self,
        handle: &KeyHandle,
        userid: Option<&str>,
        expires: u64,
        flags: CertifyFlags,
    ) -> Result<usize, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;
        if matches!(
            self.pinentry_mode,
            PinentryMode::Cancel | PinentryMode::Error
        ) {
            for signer in &self.signers {
                let protected = self
                    .store
                    .with_key(signer, |key| key.primary_subkey().material.protected)?;
                if protected {
                    return Err(BackendError::new(
                        ErrorCode::NoPassphrase,
                        "pinentry mode refuses passphrase entry",
                    )
                    .into());
                }
            }
        }
        Ok(lifecycle::sign_key(
            &self.store,
            self.backend.as_ref(),
            &self.signers,
            handle,
            userid,
            expires,
            flags,
        )?)
    }

    /// Revoke certifications made by `signing_key` (or all session signers).
    pub fn revoke_signature(
        &mut self,
        handle: &KeyHandle,
        signing_key: Option<&KeyHandle>,
        userid: Option<&str>,
        flags: CertifyFlags,
    ) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let signers = match signing_key {
            Some(handle) => vec![self.store.resolve(handle)?],
            None => self.signers.clone(),
        };
        Ok(lifecycle::revoke_signature(
            &self.store,
            &signers,
            handle,
            userid,
            flags,
        )?)
    }

    pub fn create_subkey(
        &mut self,
        handle: &KeyHandle,
        algorithm: &str,
        expires: u64,
        flags: CreateFlags,
    ) -> Result<Subkey, SessionError> {
        self.ensure_open()?;
        self.check_protocol()?;
        Ok(lifecycle::create_subkey(
            &self.store,
            self.backend.as_ref(),
            handle,
            algorithm,
            expires,
            flags,
        )?)
    }

    pub fn add_uid(&mut self, handle: &KeyHandle, userid: &str) -> Result<UserId, SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::add_uid(
            &self.store,
            self.backend.as_ref(),
            handle,
            userid,
        )?)
    }

    pub fn revoke_uid(&mut self, handle: &KeyHandle, userid: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::revoke_uid(&self.store, handle, userid)?)
    }

    pub fn set_uid_flag(
        &mut self,
        handle: &KeyHandle,
        userid: &str,
        flag: &str,
        value: &str,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::set_uid_flag(
            &self.store,
            handle,
            userid,
            flag,
            value,
        )?)
    }

    pub fn set_expire(
        &mut self,
        handle: &KeyHandle,
        expires: u64,
        subkey_fprs: Option<&[Fingerprint]>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::set_expire(
            &self.store,
            handle,
            expires,
            subkey_fprs,
        )?)
    }

    pub fn delete_key(
        &mut self,
        handle: &KeyHandle,
        flags: DeleteFlags,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::delete_key(&self.store, handle, flags)?)
    }

    pub fn set_owner_trust(
        &mut self,
        handle: &KeyHandle,
        value: impl Into<TrustInput>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(lifecycle::set_owner_trust(
            &self.store,
            handle,
            &value.into(),
        )?)
    }

    /// Computed validity of one user id.
    pub fn validity_of(
        &mut self,
        handle: &KeyHandle,
        userid: &str,
    ) -> Result<TrustLevel, SessionError> {
        self.ensure_open()?;
        let fingerprint = self.store.resolve(handle)?;
        Ok(self.trust.uid_validity(&self.store, &fingerprint, userid))
    }
}

fn capabilities_string(capabilities: KeyCapabilities) -> String {
    let mut out = String::with_capacity(4);
    if capabilities.contains(KeyCapabilities::CERTIFY) {
        out.push('c');
    }
    if capabilities.contains(KeyCapabilities::SIGN) {
        out.push('s');
    }
    if capabilities.contains(KeyCapabilities::ENCRYPT) {
        out.push('e');
    }
    if capabilities.contains(KeyCapabilities::AUTH) {
        out.push('a');
    }
    out
}

#[cfg(all(test, feature = "generate"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session() -> Session {
        Session::new(Arc::new(KeyStore::new()))
    }

    fn alice(session: &mut Session) -> Key {
        session
            .generate_key(
                "Alice <alice@example.com>",
                "ed25519",
                0,
                CreateFlags::NO_PASSPHRASE,
            )
            .unwrap()
    }

    #[test]
    fn start_wait_state_machine() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::Open);

        session
            .generate_key_start("Alice <alice@example.com>", "ed25519", 0, CreateFlags::empty())
            .unwrap();
        assert_eq!(session.state(), SessionState::OperationPending);

        // a second start while one is pending is refused
        let result =
            session.generate_key_start("Bob <bob@example.com>", "ed25519", 0, CreateFlags::empty());
        assert!(matches!(result, Err(SessionError::OperationInProgress)));

        let result = session.wait(true).unwrap().unwrap();
        let OpResult::Key(key) = result else {
            panic!("expected a key result");
        };
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.store().contains(key.fingerprint()));

        // nothing pending: immediate empty return, hanging or not
        assert!(session.wait(false).unwrap().is_none());
        assert!(session.wait(true).unwrap().is_none());
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let mut session = session();
        session.release();
        session.release();
        assert_eq!(session.state(), SessionState::Released);

        let result = session.generate_key(
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        );
        assert!(matches!(result, Err(SessionError::ContextReleased)));
        assert!(matches!(session.wait(true), Err(SessionError::ContextReleased)));
        assert!(matches!(session.set_armor(true), Err(SessionError::ContextReleased)));
    }

    #[test]
    fn cms_protocol_is_refused() {
        let mut session = session();
        session.set_protocol(Protocol::Cms).unwrap();
        let result = session.keylist("", false);
        assert!(matches!(
            result,
            Err(SessionError::UnsupportedProtocol { .. })
        ));
    }

    #[test]
    fn keylist_modes_shape_records() {
        let mut session = session();
        let key = alice(&mut session);
        session
            .set_owner_trust(&KeyHandle::from(&key), "ultimate")
            .unwrap();

        let records = session.keylist("alice", false).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.fingerprint, key.fingerprint().to_string());
        assert!(record.uids[0].certifications.is_none());
        assert!(record.uids[0].validity.is_none());
        assert!(record.subkeys[0].keygrip.is_none());
        assert!(record.v5_fingerprint.is_none());
        assert!(record.capabilities.contains('s'));

        session
            .set_keylist_mode(
                KeylistMode::LOCAL
                    | KeylistMode::SIGS
                    | KeylistMode::SIG_NOTATIONS
                    | KeylistMode::WITH_SECRET
                    | KeylistMode::WITH_KEYGRIP
                    | KeylistMode::VALIDATE
                    | KeylistMode::WITH_V5FPR,
            )
            .unwrap();
        let records = session.keylist("alice", false).unwrap();
        let record = &records[0];
        let certs = record.uids[0].certifications.as_ref().unwrap();
        assert_eq!(certs.len(), 1, "self-certification is listed");
        assert_eq!(record.uids[0].validity, Some(TrustLevel::Ultimate));
        assert_eq!(record.has_secret, Some(true));
        assert!(record.subkeys[0].keygrip.is_some());
        assert_eq!(record.v5_fingerprint.as_ref().unwrap().len(), 64);

        let json = serde_json::to_string(&records).unwrap();
        assert!(json.contains("alice@example.com"));
    }

    #[test]
    fn keylist_extern_requires_keyserver() {
        let mut session = session();
        session
            .set_keylist_mode(KeylistMode::LOCAL | KeylistMode::EXTERN)
            .unwrap();
        let result = session.keylist("", false);
        assert!(matches!(result, Err(SessionError::Backend { .. })));
    }

    #[test]
    fn export_import_round_trip_via_armor() {
        let mut session = session();
        let key = alice(&mut session);
        session.set_armor(true).unwrap();

        let exported = session.export_keys(Some("alice"), ExportMode::empty()).unwrap();
        let text = std::str::from_utf8(&exported).unwrap();
        assert!(text.starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----"));

        // import into a fresh store
        let mut other = Session::new(Arc::new(KeyStore::new()));
        let result = other.import_keys(&exported).unwrap();
        assert_eq!(result.considered, 1);
        assert_eq!(result.imported, 1);
        assert_eq!(result.secret_imported, 0);

        let imported = other
            .store()
            .find_by_fingerprint(key.fingerprint())
            .unwrap();
        assert_eq!(imported.fingerprint(), key.fingerprint());
        assert_eq!(imported.userids().len(), 1);
        assert_eq!(
            imported.userids()[0].raw(),
            key.userids()[0].raw()
        );
        assert_eq!(imported.subkeys().len(), key.subkeys().len());
        assert!(!imported.has_secret(), "secret material never leaves the store");

        // importing the same material again changes nothing
        let again = other.import_keys(&exported).unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.imported, 0);
    }

    #[test]
    fn async_export_and_import() {
        let mut session = session();
        alice(&mut session);

        session.export_keys_start(None, ExportMode::empty()).unwrap();
        let OpResult::Export(bytes) = session.wait(true).unwrap().unwrap() else {
            panic!("expected export bytes");
        };
        assert!(!bytes.is_empty());

        let mut other = Session::new(Arc::new(KeyStore::new()));
        other.import_keys_start(&bytes).unwrap();
        let OpResult::Import(result) = other.wait(true).unwrap().unwrap() else {
            panic!("expected import stats");
        };
        assert_eq!(result.imported, 1);
    }

    #[test]
    fn export_extern_requires_network() {
        let mut session = session();
        alice(&mut session);
        let result = session.export_keys(None, ExportMode::EXTERN);
        assert!(matches!(result, Err(SessionError::Backend { .. })));
    }

    #[test]
    fn signers_and_certification_flow() {
        let mut session = session();
        let signer = alice(&mut session);
        let target = session
            .generate_key("Bob <bob@example.com>", "ed25519", 0, CreateFlags::NO_PASSPHRASE)
            .unwrap();

        // no signer configured yet
        let result = session.sign_key(&KeyHandle::from(&target), None, 0, CertifyFlags::empty());
        assert!(matches!(
            result,
            Err(SessionError::Lifecycle {
                source: LifecycleError::NoSigner
            })
        ));

        session.add_signer(&KeyHandle::from(&signer)).unwrap();
        assert_eq!(session.signers().len(), 1);
        session.add_signer(&KeyHandle::from(&signer)).unwrap();
        assert_eq!(session.signers().len(), 1, "signers are deduplicated");

        let count = session
            .sign_key(&KeyHandle::from(&target), None, 0, CertifyFlags::empty())
            .unwrap();
        assert_eq!(count, 1);

        let count = session
            .revoke_signature(&KeyHandle::from(&target), None, None, CertifyFlags::empty())
            .unwrap();
        assert_eq!(count, 1);

        session.clear_signers();
        assert!(session.signers().is_empty());
    }

    #[test]
    fn pinentry_cancel_blocks_protected_signers() {
        let mut session = session();
        // protected key: no NO_PASSPHRASE flag
        let signer = session
            .generate_key("Alice <alice@example.com>", "ed25519", 0, CreateFlags::empty())
            .unwrap();
        let target = session
            .generate_key("Bob <bob@example.com>", "ed25519", 0, CreateFlags::NO_PASSPHRASE)
            .unwrap();
        session.add_signer(&KeyHandle::from(&signer)).unwrap();
        session.set_pinentry_mode(PinentryMode::Cancel).unwrap();

        let result = session.sign_key(&KeyHandle::from(&target), None, 0, CertifyFlags::empty());
        match result {
            Err(SessionError::Backend { source }) => {
                assert_eq!(source.code(), ErrorCode::NoPassphrase)
            }
            other => panic!("expected a no-passphrase backend error, got {other:?}"),
        }

        session.set_pinentry_mode(PinentryMode::Loopback).unwrap();
        session
            .sign_key(&KeyHandle::from(&target), None, 0, CertifyFlags::empty())
            .unwrap();
    }

    #[test]
    fn validity_queries_go_through_the_trust_engine() {
        let mut session = session();
        let key = alice(&mut session);
        session
            .set_owner_trust(&KeyHandle::from(&key), 5i64)
            .unwrap();
        let validity = session
            .validity_of(&KeyHandle::from(&key), "Alice <alice@example.com>")
            .unwrap();
        assert_eq!(validity, TrustLevel::Ultimate);
    }

    #[test]
    fn callbacks_fire_and_die_with_release() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut session = session();
        alice(&mut session);

        let seen = counter.clone();
        session.set_progress_callback(Box::new(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let statuses = Arc::new(AtomicUsize::new(0));
        let seen_status = statuses.clone();
        session.set_status_callback(Box::new(move |keyword, _| {
            if keyword == "EXPORTED" {
                seen_status.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.keylist("", false).unwrap();
        assert!(counter.load(Ordering::SeqCst) > 0);

        session.export_keys(None, ExportMode::empty()).unwrap();
        assert!(statuses.load(Ordering::SeqCst) > 0);

        session.release();
        assert_eq!(session.state(), SessionState::Released);
    }

    #[test]
    fn export_to_sink() {
        let mut session = session();
        alice(&mut session);
        let mut sink = Vec::new();
        session
            .export_keys_to(None, ExportMode::empty(), &mut sink)
            .unwrap();
        assert!(!sink.is_empty());
        assert_eq!(crate::packet::decode_keys(&sink).unwrap().len(), 1);
    }

    #[test]
    fn set_expire_with_blank_designator_fails_before_store_access() {
        let mut session = session();
        alice(&mut session);
        let version_before = session.store().version();

        let handle = KeyHandle::parse("  ");
        assert!(handle.is_err());
        assert_eq!(
            session.store().version(),
            version_before,
            "no store mutation happened"
        );
    }
}
