//! Key lifecycle operations. Every operation validates its arguments fully
//! before touching the store; on failure the store is left exactly as it
//! was.

use crate::certification::builder::{CertificationBuilder, CertificationBuilderError};
use crate::engine::{Backend, BackendError};
use crate::key::{Fingerprint, Key, KeyError, KeyHandle, KeyMaterial, KeyId, Subkey};
use crate::packet::certification_payload;
use crate::store::{KeyStore, StoreError};
use crate::timestamp::{expiry_from_seconds, TimestampError};
use crate::trust::{resolve_trust_input, TrustError};
use crate::types::{CertClass, CertifyFlags, CreateFlags, DeleteFlags, Protocol, TrustInput};
use crate::userid::{UserId, UserIdError};
use jiff::Timestamp;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum LifecycleError {
    #[snafu(display("unknown algorithm {name:?}"))]
    UnknownAlgorithm { name: String },
    #[snafu(display("the requested capabilities are not usable with this algorithm"))]
    NoCapability,
    #[snafu(display("key {fingerprint} has no secret material"))]
    SecretKeyRequired { fingerprint: Fingerprint },
    #[snafu(display("key has no user id {uid:?}"))]
    UserIdNotFound { uid: String },
    #[snafu(display("key already carries user id {uid:?}"))]
    DuplicateUserId { uid: String },
    #[snafu(display("key has no subkey {fingerprint}"))]
    SubkeyNotFound { fingerprint: Fingerprint },
    #[snafu(display("unsupported user id flag {flag:?}"))]
    UnsupportedFlag { flag: String },
    #[snafu(display("no signer configured"))]
    NoSigner,
    #[snafu(display("{signer} already certified {uid:?}"))]
    DuplicateSignature { signer: KeyId, uid: String },
    #[snafu(display("no matching signature to revoke"))]
    SignatureNotFound,
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    InvalidKey { source: KeyError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    UserId { source: UserIdError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Timestamp { source: TimestampError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Certification { source: CertificationBuilderError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Trust { source: TrustError },
    #[snafu(display("{source}"))]
    #[snafu(context(false))]
    Backend { source: BackendError },
}

fn effective_capabilities(
    algorithm: crate::types::KeyAlgorithm,
    flags: CreateFlags,
    primary: bool,
) -> Result<crate::types::KeyCapabilities, LifecycleError> {
    let requested = flags.capabilities();
    let mut capabilities = if requested.is_empty() {
        algorithm.default_capabilities(primary)
    } else {
        requested & algorithm.supported_capabilities()
    };
    if capabilities.is_empty() {
        return Err(LifecycleError::NoCapability);
    }
    if primary {
        // a primary key always certifies its own structure
        capabilities |= crate::types::KeyCapabilities::CERTIFY;
    }
    Ok(capabilities)
}

/// Create a new key: primary subkey, primary user id, self-certification.
pub fn create_key(
    store: &KeyStore,
    backend: &dyn Backend,
    userid: &str,
    algorithm: &str,
    expires: u64,
    flags: CreateFlags,
) -> Result<Key, LifecycleError> {
    let mut uid = UserId::parse(userid)?;
    let algorithm =
        crate::types::KeyAlgorithm::resolve(algorithm).ok_or(LifecycleError::UnknownAlgorithm {
            name: algorithm.to_owned(),
        })?;
    let capabilities = effective_capabilities(algorithm, flags, true)?;

    let mut material = backend.generate_material(algorithm)?;
    material.protected = !flags.contains(CreateFlags::NO_PASSPHRASE);
    let created_at = Timestamp::now();
    let expires_at = if flags.contains(CreateFlags::NO_EXPIRE) {
        None
    } else {
        expiry_from_seconds(created_at, expires)?
    };

    let primary = Subkey::assemble(material, algorithm, created_at, expires_at, capabilities);
    let key_id = primary.key_id();

    let payload = certification_payload(&primary, uid.raw());
    let cert = CertificationBuilder::new(CertClass::Positive)
        .timestamp(created_at.as_second())?
        .primary()
        .issue(key_id, &primary.material, &payload, backend)?;
    uid.certifications.push(cert);
    uid.primary = true;

    let key = Key::assemble(Protocol::OpenPgp, primary, uid);
    log::info!(
        "created key {} for {}",
        key.fingerprint(),
        key.userids()[0].raw()
    );
    store.insert(key.clone());
    Ok(key)
}

/// Append a subkey; requires resident secret material on the primary.
pub fn create_subkey(
    store: &KeyStore,
    backend: &dyn Backend,
    handle: &KeyHandle,
    algorithm: &str,
    expires: u64,
    flags: CreateFlags,
) -> Result<Subkey, LifecycleError> {
    let algorithm =
        crate::types::KeyAlgorithm::resolve(algorithm).ok_or(LifecycleError::UnknownAlgorithm {
            name: algorithm.to_owned(),
        })?;
    let capabilities = effective_capabilities(algorithm, flags, false)?;

    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        if !key.primary_subkey().has_secret() {
            return Err(LifecycleError::SecretKeyRequired { fingerprint });
        }
        let mut material = backend.generate_material(algorithm)?;
        material.protected = key.primary_subkey().material.protected
            && !flags.contains(CreateFlags::NO_PASSPHRASE);
        let created_at = Timestamp::now();
        let expires_at = if flags.contains(CreateFlags::NO_EXPIRE) {
            None
        } else {
            expiry_from_seconds(created_at, expires)?
        };
        let subkey = Subkey::assemble(material, algorithm, created_at, expires_at, capabilities);
        log::debug!("added subkey {} under {fingerprint}", subkey.fingerprint());
        key.subkeys.push(subkey.clone());
        Ok(subkey)
    })?
}

/// Add a user id; the claim must match `Name <email>` or
/// `Name (Comment) <email>`, and it gets a fresh self-certification.
pub fn add_uid(
    store: &KeyStore,
    backend: &dyn Backend,
    handle: &KeyHandle,
    userid: &str,
) -> Result<UserId, LifecycleError> {
    let mut uid = UserId::parse(userid)?;

    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        if !key.primary_subkey().has_secret() {
            return Err(LifecycleError::SecretKeyRequired { fingerprint });
        }
        if key.find_userid(uid.raw()).is_some() {
            return Err(LifecycleError::DuplicateUserId {
                uid: uid.raw().to_owned(),
            });
        }

        let payload = certification_payload(key.primary_subkey(), uid.raw());
        let cert = CertificationBuilder::new(CertClass::Positive).issue(
            key.key_id(),
            &key.primary_subkey().material,
            &payload,
            backend,
        )?;
        uid.certifications.push(cert);
        if key.primary_userid().is_none() {
            uid.set_primary(key.key_id());
        }
        key.userids.push(uid.clone());
        Ok(uid.clone())
    })?
}

/// Mark a user id revoked. The claim stays on the key; only the flag flips.
pub fn revoke_uid(
    store: &KeyStore,
    handle: &KeyHandle,
    userid: &str,
) -> Result<(), LifecycleError> {
    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        let uid = key
            .find_userid_mut(userid)
            .ok_or_else(|| LifecycleError::UserIdNotFound {
                uid: userid.to_owned(),
            })?;
        uid.revoke();
        Ok(())
    })?
}

/// Set or clear a user id flag. Only `"primary"` is defined; setting it
/// atomically clears the previous primary user id.
pub fn set_uid_flag(
    store: &KeyStore,
    handle: &KeyHandle,
    userid: &str,
    flag: &str,
    value: &str,
) -> Result<(), LifecycleError> {
    if flag != "primary" {
        return Err(LifecycleError::UnsupportedFlag {
            flag: flag.to_owned(),
        });
    }
    let truthy = !value.is_empty() && value != "0";

    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        let index = key
            .userids
            .iter()
            .position(|uid| uid.raw() == userid)
            .ok_or_else(|| LifecycleError::UserIdNotFound {
                uid: userid.to_owned(),
            })?;
        let key_id = key.key_id();
        if truthy {
            for uid in &mut key.userids {
                uid.clear_primary();
            }
            key.userids[index].set_primary(key_id);
        } else {
            key.userids[index].clear_primary();
        }
        Ok(())
    })?
}

/// Change expiration: of the listed subkeys if any are given, of the
/// primary key otherwise. Zero clears (never-expire).
pub fn set_expire(
    store: &KeyStore,
    handle: &KeyHandle,
    expires: u64,
    subkey_fprs: Option<&[Fingerprint]>,
) -> Result<(), LifecycleError> {
    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        match subkey_fprs {
            Some(fprs) => {
                // resolve every target and compute every expiry up front so
                // the update applies all-or-nothing
                let mut planned = Vec::with_capacity(fprs.len());
                for fpr in fprs {
                    let index = key
                        .subkeys
                        .iter()
                        .position(|subkey| subkey.fingerprint == *fpr)
                        .ok_or(LifecycleError::SubkeyNotFound { fingerprint: *fpr })?;
                    let expiry = expiry_from_seconds(key.subkeys[index].created_at, expires)?;
                    planned.push((index, expiry));
                }
                for (index, expiry) in planned {
                    key.subkeys[index].expires_at = expiry;
                }
            }
            None => {
                let expiry = expiry_from_seconds(key.primary_subkey().created_at, expires)?;
                key.subkeys[0].expires_at = expiry;
            }
        }
        Ok(())
    })?
}

/// Certify user ids of a key with every signer in `signers`.
pub fn sign_key(
    store: &KeyStore,
    backend: &dyn Backend,
    signers: &[Fingerprint],
    handle: &KeyHandle,
    userid: Option<&str>,
    expires: u64,
    flags: CertifyFlags,
) -> Result<usize, LifecycleError> {
    if signers.is_empty() {
        return Err(LifecycleError::NoSigner);
    }
    let target = store.resolve(handle)?;

    // snapshot signer materials under their own read locks first
    let mut signer_materials: Vec<(KeyId, KeyMaterial)> = Vec::with_capacity(signers.len());
    for signer in signers {
        let snapshot = store.with_key(signer, |key| {
            if !key.primary_subkey().has_secret() {
                return Err(LifecycleError::SecretKeyRequired {
                    fingerprint: *signer,
                });
            }
            Ok((key.key_id(), key.primary_subkey().material.clone()))
        })??;
        signer_materials.push(snapshot);
    }

    store.with_key_mut(&target, |key| {
        let uid_indices: Vec<usize> = match userid {
            Some(raw) => vec![key
                .userids
                .iter()
                .position(|uid| uid.raw() == raw)
                .ok_or_else(|| LifecycleError::UserIdNotFound {
                    uid: raw.to_owned(),
                })?],
            None => (0..key.userids.len()).collect(),
        };

        if !flags.contains(CertifyFlags::FORCE) {
            for &(signer_id, _) in &signer_materials {
                for &index in &uid_indices {
                    let uid = &key.userids[index];
                    if uid
                        .certifications
                        .iter()
                        .any(|cert| cert.signer == signer_id && !cert.revoked)
                    {
                        return Err(LifecycleError::DuplicateSignature {
                            signer: signer_id,
                            uid: uid.raw().to_owned(),
                        });
                    }
                }
            }
        }

        let now = Timestamp::now();
        let expires_at = if flags.contains(CertifyFlags::NOEXPIRE) {
            None
        } else {
            expiry_from_seconds(now, expires)?
        };

        // build everything before mutating anything
        let mut planned = Vec::with_capacity(signer_materials.len() * uid_indices.len());
        for &(signer_id, ref material) in &signer_materials {
            let class = if signer_id == key.key_id() {
                CertClass::Positive
            } else {
                CertClass::Generic
            };
            for &index in &uid_indices {
                let payload =
                    certification_payload(key.primary_subkey(), key.userids[index].raw());
                let mut builder = CertificationBuilder::new(class)
                    .timestamp(now.as_second())?
                    .expires_at(expires_at);
                if flags.contains(CertifyFlags::LOCAL) {
                    builder = builder.local();
                }
                let cert = builder.issue(signer_id, material, &payload, backend)?;
                planned.push((index, cert));
            }
        }

        let count = planned.len();
        for (index, cert) in planned {
            key.userids[index].certifications.push(cert);
        }
        log::debug!("added {count} certification(s) to {target}");
        Ok(count)
    })?
}

/// Revoke matching certifications: by the given signers, on one user id or
/// all of them.
pub fn revoke_signature(
    store: &KeyStore,
    signers: &[Fingerprint],
    handle: &KeyHandle,
    userid: Option<&str>,
    _flags: CertifyFlags,
) -> Result<usize, LifecycleError> {
    if signers.is_empty() {
        return Err(LifecycleError::NoSigner);
    }
    let signer_ids: Vec<KeyId> = signers.iter().map(Fingerprint::key_id).collect();
    let target = store.resolve(handle)?;

    store.with_key_mut(&target, |key| {
        let uid_indices: Vec<usize> = match userid {
            Some(raw) => vec![key
                .userids
                .iter()
                .position(|uid| uid.raw() == raw)
                .ok_or_else(|| LifecycleError::UserIdNotFound {
                    uid: raw.to_owned(),
                })?],
            None => (0..key.userids.len()).collect(),
        };

        let mut planned = Vec::new();
        for &index in &uid_indices {
            for (cert_index, cert) in key.userids[index].certifications.iter().enumerate() {
                if !cert.revoked && signer_ids.contains(&cert.signer) {
                    planned.push((index, cert_index));
                }
            }
        }
        if planned.is_empty() {
            return Err(LifecycleError::SignatureNotFound);
        }

        let count = planned.len();
        for (index, cert_index) in planned {
            key.userids[index].certifications[cert_index].revoked = true;
        }
        Ok(count)
    })?
}

/// Delete a key, honoring the secret-material and dangling-certifier
/// policies.
pub fn delete_key(
    store: &KeyStore,
    handle: &KeyHandle,
    flags: DeleteFlags,
) -> Result<(), LifecycleError> {
    let fingerprint = store.resolve(handle)?;
    store.delete(
        &fingerprint,
        flags.contains(DeleteFlags::ALLOW_SECRET) || flags.contains(DeleteFlags::FORCE),
        flags.contains(DeleteFlags::FORCE),
    )?;
    Ok(())
}

/// Set the local owner-trust statement for a key.
pub fn set_owner_trust(
    store: &KeyStore,
    handle: &KeyHandle,
    value: &TrustInput,
) -> Result<(), LifecycleError> {
    let level = resolve_trust_input(value)?;
    let fingerprint = store.resolve(handle)?;
    store.with_key_mut(&fingerprint, |key| {
        log::debug!("owner trust of {fingerprint} set to {level}");
        key.owner_trust = level;
        Ok(())
    })?
}

#[cfg(all(test, feature = "generate"))]
mod tests {
    use super::*;
    use crate::engine::LoopbackBackend;
    use crate::types::KeyCapabilities;

    fn setup() -> (KeyStore, LoopbackBackend) {
        (KeyStore::new(), LoopbackBackend::default())
    }

    fn handle(key: &Key) -> KeyHandle {
        KeyHandle::from(key)
    }

    #[test]
    fn create_key_scenario() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "rsa2048",
            0,
            CreateFlags::NO_PASSPHRASE,
        )
        .unwrap();

        assert_eq!(key.fingerprint().to_string().len(), 40);
        let primary_uid = key.primary_userid().unwrap();
        assert_eq!(primary_uid.email(), "alice@example.com");
        let caps = key.primary_subkey().capabilities();
        assert!(caps.contains(KeyCapabilities::SIGN));
        assert!(caps.contains(KeyCapabilities::CERTIFY));
        assert!(key.has_secret());
        assert!(!key.primary_subkey().material.protected);

        // fingerprint round-trips through the store
        let found = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert_eq!(found.fingerprint(), key.fingerprint());
    }

    #[test]
    fn create_key_rejects_unknown_algorithm() {
        let (store, backend) = setup();
        let result = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "rot13",
            0,
            CreateFlags::empty(),
        );
        assert!(matches!(
            result,
            Err(LifecycleError::UnknownAlgorithm { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn create_key_rejects_unusable_capabilities() {
        let (store, backend) = setup();
        let result = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "cv25519",
            0,
            CreateFlags::SIGN,
        );
        assert!(matches!(result, Err(LifecycleError::NoCapability)));
        assert!(store.is_empty());
    }

    #[test]
    fn create_key_rejects_malformed_userid_before_store_access() {
        let (store, backend) = setup();
        let result = create_key(
            &store,
            &backend,
            "not-a-uid",
            "ed25519",
            0,
            CreateFlags::empty(),
        );
        assert!(matches!(result, Err(LifecycleError::UserId { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn create_key_expiration() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            86_400,
            CreateFlags::empty(),
        )
        .unwrap();
        let primary = key.primary_subkey();
        let expiry = primary.expires_at().unwrap();
        assert_eq!(
            expiry.as_second() - primary.created_at().as_second(),
            86_400
        );

        let never = create_key(
            &store,
            &backend,
            "Bob <bob@example.com>",
            "ed25519",
            86_400,
            CreateFlags::NO_EXPIRE,
        )
        .unwrap();
        assert_eq!(never.primary_subkey().expires_at(), None);
    }

    #[test]
    fn create_subkey_requires_secret() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        let subkey = create_subkey(&store, &backend, &handle(&key), "cv25519", 0, CreateFlags::empty())
            .unwrap();
        assert_eq!(subkey.capabilities(), KeyCapabilities::ENCRYPT);
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert_eq!(stored.subkeys().len(), 2);

        // a public-only copy refuses subkey creation
        let mut public = stored.clone();
        for subkey in &mut public.subkeys {
            subkey.material = subkey.material.to_public();
        }
        let public_fpr = store.insert(public);
        let result = create_subkey(
            &store,
            &backend,
            &KeyHandle::Fingerprint(public_fpr),
            "cv25519",
            0,
            CreateFlags::empty(),
        );
        assert!(matches!(
            result,
            Err(LifecycleError::SecretKeyRequired { .. })
        ));
    }

    #[test]
    fn add_uid_and_primary_flag_scenario() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let key_handle = handle(&key);

        add_uid(&store, &backend, &key_handle, "Alice <alice@work.com>").unwrap();
        set_uid_flag(
            &store,
            &key_handle,
            "Alice <alice@work.com>",
            "primary",
            "1",
        )
        .unwrap();
        add_uid(&store, &backend, &key_handle, "Alice <alice@home.com>").unwrap();
        set_uid_flag(
            &store,
            &key_handle,
            "Alice <alice@home.com>",
            "primary",
            "yes",
        )
        .unwrap();

        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        let primaries: Vec<&str> = stored
            .userids()
            .iter()
            .filter(|uid| uid.is_primary())
            .map(|uid| uid.email())
            .collect();
        assert_eq!(primaries, vec!["alice@home.com"]);
        assert_eq!(stored.userids().len(), 3);
    }

    #[test]
    fn set_uid_flag_falsy_clears_without_replacement() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        set_uid_flag(
            &store,
            &handle(&key),
            "Alice <alice@example.com>",
            "primary",
            "0",
        )
        .unwrap();
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert!(stored.primary_userid().is_none());
    }

    #[test]
    fn set_uid_flag_rejects_unknown_flags() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let result = set_uid_flag(
            &store,
            &handle(&key),
            "Alice <alice@example.com>",
            "frobnicate",
            "1",
        );
        assert!(matches!(result, Err(LifecycleError::UnsupportedFlag { .. })));
    }

    #[test]
    fn add_uid_rejects_duplicates_and_bad_format() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        let result = add_uid(&store, &backend, &handle(&key), "Alice <alice@example.com>");
        assert!(matches!(result, Err(LifecycleError::DuplicateUserId { .. })));

        let result = add_uid(&store, &backend, &handle(&key), "no email here");
        assert!(matches!(result, Err(LifecycleError::UserId { .. })));
    }

    #[test]
    fn revoke_uid_keeps_the_claim() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        add_uid(&store, &backend, &handle(&key), "Alice <alice@work.com>").unwrap();

        let before = store
            .find_by_fingerprint(key.fingerprint())
            .unwrap()
            .userids()
            .len();
        revoke_uid(&store, &handle(&key), "Alice <alice@work.com>").unwrap();
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert_eq!(stored.userids().len(), before);
        assert!(stored.find_userid("Alice <alice@work.com>").unwrap().is_revoked());

        let result = revoke_uid(&store, &handle(&key), "Alice <alice@work.com> ");
        assert!(matches!(result, Err(LifecycleError::UserIdNotFound { .. })));
    }

    #[test]
    fn set_expire_on_primary_and_subkeys() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let subkey =
            create_subkey(&store, &backend, &handle(&key), "cv25519", 0, CreateFlags::empty())
                .unwrap();

        set_expire(&store, &handle(&key), 3_600, None).unwrap();
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert!(stored.primary_subkey().expires_at().is_some());
        assert_eq!(stored.subkeys()[1].expires_at(), None);

        set_expire(
            &store,
            &handle(&key),
            7_200,
            Some(&[*subkey.fingerprint()]),
        )
        .unwrap();
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert!(stored.subkeys()[1].expires_at().is_some());

        // clearing with zero
        set_expire(&store, &handle(&key), 0, None).unwrap();
        let stored = store.find_by_fingerprint(key.fingerprint()).unwrap();
        assert_eq!(stored.primary_subkey().expires_at(), None);

        // an unknown subkey fingerprint applies nothing
        let bogus = Fingerprint::from([9u8; 20]);
        let before = store.find_by_fingerprint(key.fingerprint()).unwrap();
        let result = set_expire(
            &store,
            &handle(&key),
            60,
            Some(&[*subkey.fingerprint(), bogus]),
        );
        assert!(matches!(result, Err(LifecycleError::SubkeyNotFound { .. })));
        assert_eq!(store.find_by_fingerprint(key.fingerprint()).unwrap(), before);
    }

    #[test]
    fn sign_key_requires_a_signer() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let result = sign_key(
            &store,
            &backend,
            &[],
            &handle(&key),
            None,
            0,
            CertifyFlags::empty(),
        );
        assert!(matches!(result, Err(LifecycleError::NoSigner)));
    }

    #[test]
    fn sign_key_rejects_duplicates_unless_forced() {
        let (store, backend) = setup();
        let alice = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let bob = create_key(
            &store,
            &backend,
            "Bob <bob@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        let signers = [*alice.fingerprint()];
        let count = sign_key(
            &store,
            &backend,
            &signers,
            &handle(&bob),
            None,
            0,
            CertifyFlags::empty(),
        )
        .unwrap();
        assert_eq!(count, 1);

        let result = sign_key(
            &store,
            &backend,
            &signers,
            &handle(&bob),
            None,
            0,
            CertifyFlags::empty(),
        );
        assert!(matches!(
            result,
            Err(LifecycleError::DuplicateSignature { .. })
        ));

        let count = sign_key(
            &store,
            &backend,
            &signers,
            &handle(&bob),
            None,
            0,
            CertifyFlags::FORCE,
        )
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn sign_key_local_certifications_are_not_exportable() {
        let (store, backend) = setup();
        let alice = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let bob = create_key(
            &store,
            &backend,
            "Bob <bob@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        sign_key(
            &store,
            &backend,
            &[*alice.fingerprint()],
            &handle(&bob),
            Some("Bob <bob@example.com>"),
            0,
            CertifyFlags::LOCAL,
        )
        .unwrap();

        let stored = store.find_by_fingerprint(bob.fingerprint()).unwrap();
        let cert = stored.userids()[0]
            .certifications()
            .iter()
            .find(|cert| cert.signer() == alice.key_id())
            .unwrap();
        assert!(!cert.is_exportable());
    }

    #[test]
    fn revoke_signature_flips_matching_certifications() {
        let (store, backend) = setup();
        let alice = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        let bob = create_key(
            &store,
            &backend,
            "Bob <bob@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();
        sign_key(
            &store,
            &backend,
            &[*alice.fingerprint()],
            &handle(&bob),
            None,
            0,
            CertifyFlags::empty(),
        )
        .unwrap();

        let count =
            revoke_signature(&store, &[*alice.fingerprint()], &handle(&bob), None, CertifyFlags::empty())
                .unwrap();
        assert_eq!(count, 1);

        let result =
            revoke_signature(&store, &[*alice.fingerprint()], &handle(&bob), None, CertifyFlags::empty());
        assert!(matches!(result, Err(LifecycleError::SignatureNotFound)));
    }

    #[test]
    fn delete_key_policies() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        let result = delete_key(&store, &handle(&key), DeleteFlags::empty());
        assert!(matches!(
            result,
            Err(LifecycleError::Store {
                source: StoreError::SecretKeyProtected { .. }
            })
        ));
        assert!(store.contains(key.fingerprint()));

        delete_key(&store, &handle(&key), DeleteFlags::FORCE).unwrap();
        assert!(store.find_by_fingerprint(key.fingerprint()).is_none());
    }

    #[test]
    fn owner_trust_accepts_names_and_ordinals() {
        let (store, backend) = setup();
        let key = create_key(
            &store,
            &backend,
            "Alice <alice@example.com>",
            "ed25519",
            0,
            CreateFlags::empty(),
        )
        .unwrap();

        set_owner_trust(&store, &handle(&key), &TrustInput::Named("ultimate".into())).unwrap();
        assert_eq!(
            store
                .find_by_fingerprint(key.fingerprint())
                .unwrap()
                .owner_trust(),
            crate::types::TrustLevel::Ultimate
        );

        set_owner_trust(&store, &handle(&key), &TrustInput::Ordinal(3)).unwrap();
        assert_eq!(
            store
                .find_by_fingerprint(key.fingerprint())
                .unwrap()
                .owner_trust(),
            crate::types::TrustLevel::Marginal
        );

        let result = set_owner_trust(&store, &handle(&key), &TrustInput::Ordinal(6));
        assert!(matches!(
            result,
            Err(LifecycleError::Trust {
                source: TrustError::InvalidTrustValue { .. }
            })
        ));
    }

    #[test]
    fn blank_key_designators_fail_before_any_lookup() {
        let error = KeyHandle::parse("   ").unwrap_err();
        assert!(matches!(error, KeyError::EmptyKeyDesignator));
    }
}
