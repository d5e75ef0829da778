pub(crate) mod builder;

use crate::key::KeyId;
use crate::types::CertClass;
use jiff::Timestamp;

/// A notation attached to a certification, name/value with a
/// human-readable marker.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notation {
    pub name: String,
    pub value: String,
    pub human_readable: bool,
}

/// A statement by one key vouching for a user id. The signing key is
/// referenced by key id only; it may not be resident locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Certification {
    pub(crate) signer: KeyId,
    pub(crate) class: CertClass,
    pub(crate) created_at: Timestamp,
    pub(crate) expires_at: Option<Timestamp>,
    pub(crate) exportable: bool,
    pub(crate) revoked: bool,
    pub(crate) trust_depth: u8,
    pub(crate) trust_value: u8,
    pub(crate) trust_scope: Option<String>,
    pub(crate) primary_uid: bool,
    pub(crate) notations: Vec<Notation>,
    /// Raw signature bytes as produced by the backend.
    pub(crate) sig_bytes: Vec<u8>,
}

impl Certification {
    pub fn signer(&self) -> KeyId {
        self.signer
    }

    pub fn class(&self) -> CertClass {
        self.class
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Web-of-Trust delegation parameters; depth zero means a plain
    /// certification with no introducer delegation.
    pub fn trust_delegation(&self) -> (u8, u8) {
        (self.trust_depth, self.trust_value)
    }

    pub fn trust_scope(&self) -> Option<&str> {
        self.trust_scope.as_deref()
    }

    pub fn notations(&self) -> &[Notation] {
        &self.notations
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Live: neither revoked nor past its expiration.
    pub fn is_effective(&self, now: Timestamp) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Whether two certifications express the same statement (used for
    /// duplicate detection and import merging).
    pub(crate) fn same_statement(&self, other: &Certification) -> bool {
        self.signer == other.signer
            && self.class == other.class
            && self.created_at.as_second() == other.created_at.as_second()
    }
}
