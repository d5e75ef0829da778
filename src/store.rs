//! In-memory key store: per-fingerprint reader-writer locking, snapshot
//! pattern scans, guarded deletion.

use crate::key::{Fingerprint, Key, KeyHandle};
use snafu::Snafu;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("no key matches {handle}"))]
    KeyNotFound { handle: String },
    #[snafu(display("key {fingerprint} holds secret material"))]
    SecretKeyProtected { fingerprint: Fingerprint },
    #[snafu(display(
        "key {fingerprint} certifies {referents} resident user id(s), deletion needs force"
    ))]
    DanglingCertifier {
        fingerprint: Fingerprint,
        referents: usize,
    },
}

type Shared = Arc<RwLock<Key>>;

/// Repository of keys. Readers of distinct keys proceed unimpeded; mutation
/// takes an exclusive lock scoped to one fingerprint, never the whole store.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<Fingerprint, Shared>>,
    version: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotone counter bumped on every mutation; the trust engine keys its
    /// cache off this.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        read(&self.keys).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.keys).is_empty()
    }

    /// Insert or replace a key, keyed by its fingerprint.
    pub fn insert(&self, key: Key) -> Fingerprint {
        let fingerprint = *key.fingerprint();
        log::debug!("storing key {fingerprint}");
        write(&self.keys).insert(fingerprint, Arc::new(RwLock::new(key)));
        self.bump();
        fingerprint
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        read(&self.keys).contains_key(fingerprint)
    }

    /// Snapshot of one key.
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<Key> {
        let shared = read(&self.keys).get(fingerprint).cloned()?;
        let key = read(&shared).clone();
        Some(key)
    }

    /// Resolve a handle into the fingerprint of a resident key.
    pub fn resolve(&self, handle: &KeyHandle) -> Result<Fingerprint, StoreError> {
        match handle {
            KeyHandle::Fingerprint(fingerprint) => {
                if self.contains(fingerprint) {
                    Ok(*fingerprint)
                } else {
                    Err(StoreError::KeyNotFound {
                        handle: fingerprint.to_string(),
                    })
                }
            }
            KeyHandle::KeyId(key_id) => read(&self.keys)
                .keys()
                .find(|fingerprint| fingerprint.key_id() == *key_id)
                .copied()
                .ok_or_else(|| StoreError::KeyNotFound {
                    handle: key_id.to_string(),
                }),
        }
    }

    /// Run a closure against a key under its read lock.
    pub fn with_key<R>(
        &self,
        fingerprint: &Fingerprint,
        f: impl FnOnce(&Key) -> R,
    ) -> Result<R, StoreError> {
        let shared = self.shared(fingerprint)?;
        let guard = read(&shared);
        Ok(f(&guard))
    }

    /// Run a closure against a key under its write lock. The closure returns
    /// `Ok` only once the whole mutation is known to apply; the version
    /// counter is bumped only then.
    pub fn with_key_mut<R, E>(
        &self,
        fingerprint: &Fingerprint,
        f: impl FnOnce(&mut Key) -> Result<R, E>,
    ) -> Result<Result<R, E>, StoreError> {
        let shared = self.shared(fingerprint)?;
        let mut guard = write(&shared);
        let outcome = f(&mut guard);
        if outcome.is_ok() {
            self.bump();
        }
        Ok(outcome)
    }

    fn shared(&self, fingerprint: &Fingerprint) -> Result<Shared, StoreError> {
        read(&self.keys)
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound {
                handle: fingerprint.to_string(),
            })
    }

    /// Lazy scan over a snapshot taken now; concurrent inserts and deletes
    /// do not disturb an iteration in progress.
    pub fn find_by_pattern(&self, pattern: &str, secret_only: bool) -> PatternScan {
        let entries: Vec<Shared> = read(&self.keys).values().cloned().collect();
        PatternScan {
            entries: entries.into_iter(),
            pattern: pattern.to_owned(),
            secret_only,
        }
    }

    /// Snapshot of every resident key.
    pub fn snapshot(&self) -> Vec<Key> {
        read(&self.keys)
            .values()
            .map(|shared| read(shared).clone())
            .collect()
    }

    pub fn all_fingerprints(&self) -> Vec<Fingerprint> {
        read(&self.keys).keys().copied().collect()
    }

    /// Remove a key. Secret material requires `allow_secret`; a key still
    /// referenced as certifier by other resident keys requires `force`.
    pub fn delete(
        &self,
        fingerprint: &Fingerprint,
        allow_secret: bool,
        force: bool,
    ) -> Result<(), StoreError> {
        let mut keys = write(&self.keys);
        let shared = keys
            .get(fingerprint)
            .ok_or_else(|| StoreError::KeyNotFound {
                handle: fingerprint.to_string(),
            })?;

        if !allow_secret && read(shared).has_secret() {
            return Err(StoreError::SecretKeyProtected {
                fingerprint: *fingerprint,
            });
        }

        if !force {
            let key_id = fingerprint.key_id();
            let referents = keys
                .iter()
                .filter(|(other, _)| *other != fingerprint)
                .map(|(_, shared)| {
                    read(shared)
                        .userids()
                        .iter()
                        .flat_map(|uid| uid.certifications())
                        .filter(|cert| cert.signer() == key_id)
                        .count()
                })
                .sum::<usize>();
            if referents > 0 {
                return Err(StoreError::DanglingCertifier {
                    fingerprint: *fingerprint,
                    referents,
                });
            }
        }

        keys.remove(fingerprint);
        drop(keys);
        log::debug!("deleted key {fingerprint}");
        self.bump();
        Ok(())
    }
}

/// Iterator returned by [`KeyStore::find_by_pattern`].
pub struct PatternScan {
    entries: std::vec::IntoIter<Shared>,
    pattern: String,
    secret_only: bool,
}

impl Iterator for PatternScan {
    type Item = Key;

    fn next(&mut self) -> Option<Key> {
        for shared in self.entries.by_ref() {
            let key = read(&shared);
            if self.secret_only && !key.has_secret() {
                continue;
            }
            if key.matches_pattern(&self.pattern) {
                return Some(key.clone());
            }
        }
        None
    }
}
