//! Web-of-Trust validity computation. Owner trust is a local statement
//! about a key holder; validity is what the certification graph supports
//! for a user id. Recomputation is lazy, cached against the store version.

use crate::key::{Fingerprint, Key};
use crate::store::KeyStore;
use crate::types::{TrustInput, TrustLevel};
use jiff::Timestamp;
use regex::Regex;
use snafu::Snafu;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, PartialEq, Snafu)]
pub enum TrustError {
    #[snafu(display("{input:?} is not a valid trust value"))]
    InvalidTrustValue { input: String },
    #[snafu(display("trust level ordinals must be passed as integers, got the string {input:?}"))]
    InvalidArgumentType { input: String },
}

/// Resolve caller input into a trust level. Digit strings are rejected as a
/// category error; ordinals must arrive as integers.
pub fn resolve_trust_input(input: &TrustInput) -> Result<TrustLevel, TrustError> {
    match input {
        TrustInput::Ordinal(ordinal) => {
            TrustLevel::from_ordinal(*ordinal).ok_or(TrustError::InvalidTrustValue {
                input: ordinal.to_string(),
            })
        }
        TrustInput::Named(name) => {
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
                return Err(TrustError::InvalidArgumentType {
                    input: name.clone(),
                });
            }
            TrustLevel::from_name(name).ok_or(TrustError::InvalidTrustValue {
                input: name.clone(),
            })
        }
    }
}

/// Tunables of the validity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustConfig {
    /// Distinct marginal certifiers needed for full computed validity.
    pub marginals_needed: usize,
    /// Distinct full certifiers needed for full computed validity.
    pub completes_needed: usize,
    /// Maximum certification chain length considered.
    pub max_cert_depth: usize,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            marginals_needed: 3,
            completes_needed: 1,
            max_cert_depth: 5,
        }
    }
}

#[derive(Default)]
struct Cache {
    version: Option<u64>,
    validity: HashMap<(Fingerprint, String), TrustLevel>,
}

/// Computes and caches user id validity from the signature graph.
#[derive(Default)]
pub struct TrustEngine {
    config: TrustConfig,
    cache: Mutex<Cache>,
}

impl TrustEngine {
    pub fn new(config: TrustConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    /// Validity of one user id of one key.
    pub fn uid_validity(&self, store: &KeyStore, fingerprint: &Fingerprint, uid: &str) -> TrustLevel {
        self.with_fresh_cache(store, |validity| {
            validity
                .get(&(*fingerprint, uid.to_owned()))
                .copied()
                .unwrap_or_default()
        })
    }

    /// Best validity over a key's user ids.
    pub fn key_validity(&self, store: &KeyStore, fingerprint: &Fingerprint) -> TrustLevel {
        self.with_fresh_cache(store, |validity| {
            validity
                .iter()
                .filter(|((fpr, _), _)| fpr == fingerprint)
                .map(|(_, level)| *level)
                .max()
                .unwrap_or_default()
        })
    }

    /// Fill the computed validity into a key snapshot's user ids.
    pub fn annotate(&self, store: &KeyStore, key: &mut Key) {
        let fingerprint = *key.fingerprint();
        self.with_fresh_cache(store, |validity| {
            for uid in &mut key.userids {
                uid.validity = validity
                    .get(&(fingerprint, uid.raw.clone()))
                    .copied()
                    .unwrap_or_default();
            }
        })
    }

    fn with_fresh_cache<R>(
        &self,
        store: &KeyStore,
        f: impl FnOnce(&HashMap<(Fingerprint, String), TrustLevel>) -> R,
    ) -> R {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let version = store.version();
        if cache.version != Some(version) {
            log::debug!("recomputing trust graph at store version {version}");
            cache.validity = compute(&store.snapshot(), &self.config);
            cache.version = Some(version);
        }
        f(&cache.validity)
    }
}

struct Introducer {
    /// Remaining delegation hops; 1 means "may certify, may not delegate".
    depth: usize,
    weight: TrustLevel,
    scope: Option<Regex>,
}

fn trust_value_weight(value: u8) -> Option<TrustLevel> {
    match value {
        120.. => Some(TrustLevel::Full),
        60..=119 => Some(TrustLevel::Marginal),
        _ => None,
    }
}

fn usable(key: &Key, now: Timestamp) -> bool {
    !key.is_revoked() && !key.is_disabled() && !key.is_invalid() && !key.is_expired(now)
}

fn compute(keys: &[Key], config: &TrustConfig) -> HashMap<(Fingerprint, String), TrustLevel> {
    let now = Timestamp::now();

    let by_key_id: HashMap<_, _> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| (key.key_id(), index))
        .collect();

    let mut validity: Vec<Vec<TrustLevel>> = keys
        .iter()
        .map(|key| vec![TrustLevel::Unknown; key.userids().len()])
        .collect();
    let mut introducers: HashMap<usize, Introducer> = HashMap::new();

    // Ultimate owner trust seeds the graph. With resident secret material
    // the short-circuit is to ultimate validity, otherwise to full.
    for (index, key) in keys.iter().enumerate() {
        if key.owner_trust() != TrustLevel::Ultimate || !usable(key, now) {
            continue;
        }
        let level = if key.has_secret() {
            TrustLevel::Ultimate
        } else {
            TrustLevel::Full
        };
        for (uid_index, uid) in key.userids().iter().enumerate() {
            if !uid.is_revoked() {
                validity[index][uid_index] = level;
            }
        }
        introducers.insert(
            index,
            Introducer {
                depth: config.max_cert_depth,
                weight: TrustLevel::Ultimate,
                scope: None,
            },
        );
    }

    for _round in 0..=config.max_cert_depth {
        let mut changed = false;

        // certifications by current introducers raise user id validity
        for (index, key) in keys.iter().enumerate() {
            if !usable(key, now) {
                continue;
            }
            for (uid_index, uid) in key.userids().iter().enumerate() {
                if uid.is_revoked() || validity[index][uid_index] >= TrustLevel::Ultimate {
                    continue;
                }
                let mut votes: HashMap<usize, TrustLevel> = HashMap::new();
                for cert in uid.certifications() {
                    if !cert.is_effective(now) {
                        continue;
                    }
                    let Some(&signer) = by_key_id.get(&cert.signer()) else {
                        continue;
                    };
                    if signer == index {
                        continue;
                    }
                    let Some(introducer) = introducers.get(&signer) else {
                        continue;
                    };
                    if introducer.depth == 0 {
                        continue;
                    }
                    if let Some(ref scope) = introducer.scope {
                        if !scope.is_match(uid.raw()) {
                            continue;
                        }
                    }
                    let entry = votes.entry(signer).or_insert(TrustLevel::Unknown);
                    *entry = (*entry).max(introducer.weight);
                }

                let full_votes = votes.values().filter(|w| **w >= TrustLevel::Full).count();
                let marginal_votes = votes
                    .values()
                    .filter(|w| **w == TrustLevel::Marginal)
                    .count();
                let computed = if full_votes >= config.completes_needed
                    || marginal_votes >= config.marginals_needed
                {
                    TrustLevel::Full
                } else if full_votes + marginal_votes > 0 {
                    TrustLevel::Marginal
                } else {
                    TrustLevel::Unknown
                };
                if computed > validity[index][uid_index] {
                    validity[index][uid_index] = computed;
                    changed = true;
                }
            }
        }

        // valid keys become introducers: by local owner trust, or by a trust
        // signature from an introducer with delegation hops to spend
        for (index, key) in keys.iter().enumerate() {
            if !usable(key, now) || key.owner_trust() == TrustLevel::Never {
                continue;
            }
            let key_validity = validity[index].iter().copied().max().unwrap_or_default();
            if key_validity < TrustLevel::Full {
                continue;
            }

            if matches!(
                key.owner_trust(),
                TrustLevel::Marginal | TrustLevel::Full
            ) {
                changed |= upgrade(&mut introducers, index, 1, key.owner_trust(), None);
            }

            for uid in key.userids() {
                if uid.is_revoked() {
                    continue;
                }
                for cert in uid.certifications() {
                    let (depth, value) = cert.trust_delegation();
                    if depth == 0 || !cert.is_effective(now) {
                        continue;
                    }
                    let Some(weight) = trust_value_weight(value) else {
                        continue;
                    };
                    let Some(&signer) = by_key_id.get(&cert.signer()) else {
                        continue;
                    };
                    if signer == index {
                        continue;
                    }
                    let Some((parent_depth, parent_weight)) = introducers
                        .get(&signer)
                        .map(|parent| (parent.depth, parent.weight))
                    else {
                        continue;
                    };
                    if parent_depth <= 1 {
                        // the parent may certify but not delegate further
                        continue;
                    }
                    let granted_depth = (depth as usize).min(parent_depth - 1);
                    let granted_weight = weight.min(parent_weight);
                    let scope = cert.trust_scope().and_then(|pattern| {
                        Regex::new(pattern)
                            .map_err(|error| {
                                log::warn!("ignoring unparsable trust scope {pattern:?}: {error}")
                            })
                            .ok()
                    });
                    changed |=
                        upgrade(&mut introducers, index, granted_depth, granted_weight, scope);
                }
            }
        }

        if !changed {
            break;
        }
    }

    let mut result = HashMap::new();
    for (index, key) in keys.iter().enumerate() {
        for (uid_index, uid) in key.userids().iter().enumerate() {
            result.insert(
                (*key.fingerprint(), uid.raw().to_owned()),
                validity[index][uid_index],
            );
        }
    }
    result
}

fn upgrade(
    introducers: &mut HashMap<usize, Introducer>,
    index: usize,
    depth: usize,
    weight: TrustLevel,
    scope: Option<Regex>,
) -> bool {
    match introducers.get_mut(&index) {
        Some(existing) => {
            let mut changed = false;
            if depth > existing.depth {
                existing.depth = depth;
                changed = true;
            }
            if weight > existing.weight {
                existing.weight = weight;
                changed = true;
            }
            if existing.scope.is_some() && scope.is_none() {
                // an unscoped path is broader than any scoped one
                existing.scope = None;
                changed = true;
            }
            changed
        }
        None => {
            introducers.insert(
                index,
                Introducer {
                    depth,
                    weight,
                    scope,
                },
            );
            true
        }
    }
}
