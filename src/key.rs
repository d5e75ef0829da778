use crate::types::{KeyAlgorithm, KeyCapabilities, Protocol, TrustLevel};
use crate::userid::UserId;
use jiff::Timestamp;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum KeyError {
    #[snafu(display("empty key designator"))]
    EmptyKeyDesignator,
    #[snafu(display("{value:?} is neither a fingerprint nor a key id"))]
    InvalidKeyDesignator { value: String },
    #[snafu(display("invalid fingerprint {value:?}"))]
    InvalidFingerprint { value: String },
}

/// 20-byte v4 key fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Fingerprint of a serialized public key packet body, computed over the
    /// 0x99-framed packet as mandated by RFC 4880 section 12.2.
    pub(crate) fn derive(body: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update([0x99, (body.len() >> 8) as u8, body.len() as u8]);
        hasher.update(body);
        Self(hasher.finalize().into())
    }

    /// 32-byte fingerprint over the same body, for v5-style listings.
    pub(crate) fn derive_v5(body: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([0x9a, 0, 0, (body.len() >> 8) as u8, body.len() as u8]);
        hasher.update(body);
        hasher.finalize().into()
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Trailing eight bytes, the classic key id.
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[12..]);
        KeyId(id)
    }

    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(value).map_err(|_| KeyError::InvalidFingerprint {
            value: value.to_owned(),
        })?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidFingerprint {
                value: value.to_owned(),
            })?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 20]> for Fingerprint {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_hex(&string).map_err(serde::de::Error::custom)
    }
}

/// Trailing-eight-bytes key id, the weak reference certifications carry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub(crate) [u8; 8]);

impl KeyId {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(value).map_err(|_| KeyError::InvalidKeyDesignator {
            value: value.to_owned(),
        })?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidKeyDesignator {
                value: value.to_owned(),
            })?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 8]> for KeyId {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// How a caller designates a key at the API boundary: by fingerprint or by
/// key id, resolved into one canonical store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyHandle {
    Fingerprint(Fingerprint),
    KeyId(KeyId),
}

impl KeyHandle {
    /// Parse a hex designator. Blank input is rejected here, before any
    /// store access happens.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(KeyError::EmptyKeyDesignator);
        }
        match value.len() {
            40 => Fingerprint::from_hex(value).map(Self::Fingerprint),
            16 => KeyId::from_hex(value).map(Self::KeyId),
            _ => Err(KeyError::InvalidKeyDesignator {
                value: value.to_owned(),
            }),
        }
    }
}

impl From<Fingerprint> for KeyHandle {
    fn from(fingerprint: Fingerprint) -> Self {
        Self::Fingerprint(fingerprint)
    }
}

impl From<KeyId> for KeyHandle {
    fn from(key_id: KeyId) -> Self {
        Self::KeyId(key_id)
    }
}

impl From<&Key> for KeyHandle {
    fn from(key: &Key) -> Self {
        Self::Fingerprint(*key.fingerprint())
    }
}

/// Raw key material as produced by the backend. The secret half never shows
/// up in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub(crate) public: Vec<u8>,
    pub(crate) secret: Option<Vec<u8>>,
    pub(crate) protected: bool,
}

impl KeyMaterial {
    pub fn public_only(public: Vec<u8>) -> Self {
        Self {
            public,
            secret: None,
            protected: false,
        }
    }

    pub fn with_secret(public: Vec<u8>, secret: Vec<u8>, protected: bool) -> Self {
        Self {
            public,
            secret: Some(secret),
            protected,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Strip the secret half, leaving the public part intact.
    pub fn to_public(&self) -> Self {
        Self::public_only(self.public.clone())
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &hex::encode(&self.public))
            .field("secret", &self.secret.as_ref().map(|_| "<secret>"))
            .field("protected", &self.protected)
            .finish()
    }
}

/// Cryptographic key material bound under a primary key. The first subkey of
/// a [`Key`] is the primary itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Subkey {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) algorithm: KeyAlgorithm,
    pub(crate) created_at: Timestamp,
    pub(crate) expires_at: Option<Timestamp>,
    pub(crate) capabilities: KeyCapabilities,
    pub(crate) keygrip: String,
    pub(crate) is_card_key: bool,
    pub(crate) material: KeyMaterial,
}

impl Subkey {
    pub(crate) fn assemble(
        material: KeyMaterial,
        algorithm: KeyAlgorithm,
        created_at: Timestamp,
        expires_at: Option<Timestamp>,
        capabilities: KeyCapabilities,
    ) -> Self {
        let body = crate::packet::public_body(&material, algorithm, created_at);
        let fingerprint = Fingerprint::derive(&body);
        let keygrip = {
            let mut hasher = Sha1::new();
            hasher.update(&material.public);
            hex::encode(hasher.finalize())
        };
        Self {
            fingerprint,
            algorithm,
            created_at,
            expires_at,
            capabilities,
            keygrip,
            is_card_key: false,
            material,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    pub fn capabilities(&self) -> KeyCapabilities {
        self.capabilities
    }

    pub fn keygrip(&self) -> &str {
        &self.keygrip
    }

    pub fn is_card_key(&self) -> bool {
        self.is_card_key
    }

    pub fn has_secret(&self) -> bool {
        self.material.has_secret()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn v5_fingerprint(&self) -> [u8; 32] {
        let body = crate::packet::public_body(&self.material, self.algorithm, self.created_at);
        Fingerprint::derive_v5(&body)
    }
}

/// A designated revoker, referenced weakly by fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationKey {
    pub algorithm_id: u8,
    pub fingerprint: Fingerprint,
    pub sensitive: bool,
}

/// Primary key with its subkeys, user ids and local state.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub(crate) protocol: Protocol,
    pub(crate) owner_trust: TrustLevel,
    pub(crate) revoked: bool,
    pub(crate) disabled: bool,
    pub(crate) invalid: bool,
    pub(crate) subkeys: Vec<Subkey>,
    pub(crate) userids: Vec<UserId>,
    pub(crate) revocation_keys: Vec<RevocationKey>,
}

impl Key {
    pub(crate) fn assemble(protocol: Protocol, primary: Subkey, userid: UserId) -> Self {
        Self {
            protocol,
            owner_trust: TrustLevel::Unknown,
            revoked: false,
            disabled: false,
            invalid: false,
            subkeys: vec![primary],
            userids: vec![userid],
            revocation_keys: Vec::new(),
        }
    }

    /// Fingerprint of the primary subkey, the key's identity.
    pub fn fingerprint(&self) -> &Fingerprint {
        self.primary_subkey().fingerprint()
    }

    pub fn key_id(&self) -> KeyId {
        self.fingerprint().key_id()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn owner_trust(&self) -> TrustLevel {
        self.owner_trust
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn primary_subkey(&self) -> &Subkey {
        &self.subkeys[0]
    }

    pub fn subkeys(&self) -> &[Subkey] {
        &self.subkeys
    }

    pub fn userids(&self) -> &[UserId] {
        &self.userids
    }

    pub fn revocation_keys(&self) -> &[RevocationKey] {
        &self.revocation_keys
    }

    /// The user id flagged primary, if any.
    pub fn primary_userid(&self) -> Option<&UserId> {
        self.userids.iter().find(|uid| uid.is_primary())
    }

    pub fn has_secret(&self) -> bool {
        self.subkeys.iter().any(Subkey::has_secret)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.primary_subkey().is_expired(now)
    }

    /// Union of capabilities over subkeys still usable at `now`.
    pub fn capabilities(&self, now: Timestamp) -> KeyCapabilities {
        self.subkeys
            .iter()
            .filter(|subkey| !subkey.is_expired(now))
            .fold(KeyCapabilities::empty(), |caps, subkey| {
                caps | subkey.capabilities
            })
    }

    pub(crate) fn find_userid(&self, raw: &str) -> Option<&UserId> {
        self.userids.iter().find(|uid| uid.raw() == raw)
    }

    pub(crate) fn find_userid_mut(&mut self, raw: &str) -> Option<&mut UserId> {
        self.userids.iter_mut().find(|uid| uid.raw() == raw)
    }

    pub(crate) fn find_subkey_mut(&mut self, fingerprint: &Fingerprint) -> Option<&mut Subkey> {
        self.subkeys
            .iter_mut()
            .find(|subkey| subkey.fingerprint == *fingerprint)
    }

    /// Case-insensitive match against user id name/email or hex identifiers.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        let pattern = pattern.to_lowercase();
        let fpr = self.fingerprint().to_string();
        if fpr.ends_with(&pattern) || fpr == pattern {
            return true;
        }
        self.userids.iter().any(|uid| {
            uid.name().to_lowercase().contains(&pattern)
                || uid.email().to_lowercase().contains(&pattern)
                || uid.raw().to_lowercase().contains(&pattern)
        })
    }

    /// Merge another copy of the same key into this one, as done on import.
    /// Returns whether anything changed; local-only state (owner trust,
    /// disabled flag) is never touched.
    pub(crate) fn merge(&mut self, other: Key) -> bool {
        let mut changed = false;

        if other.revoked && !self.revoked {
            self.revoked = true;
            changed = true;
        }

        for incoming in other.subkeys {
            match self.find_subkey_mut(&incoming.fingerprint) {
                Some(existing) => {
                    if !existing.has_secret() && incoming.has_secret() {
                        existing.material = incoming.material;
                        changed = true;
                    }
                }
                None => {
                    self.subkeys.push(incoming);
                    changed = true;
                }
            }
        }

        let have_primary = self.primary_userid().is_some();
        for mut incoming in other.userids {
            let raw = incoming.raw().to_owned();
            match self.find_userid_mut(&raw) {
                Some(existing) => {
                    if existing.merge(incoming) {
                        changed = true;
                    }
                }
                None => {
                    if have_primary {
                        incoming.clear_primary();
                    }
                    self.userids.push(incoming);
                    changed = true;
                }
            }
        }

        for incoming in other.revocation_keys {
            if !self
                .revocation_keys
                .iter()
                .any(|existing| existing.fingerprint == incoming.fingerprint)
            {
                self.revocation_keys.push(incoming);
                changed = true;
            }
        }

        changed
    }
}
