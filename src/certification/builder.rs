use crate::certification::{Certification, Notation};
use crate::engine::{Backend, BackendError};
use crate::key::{KeyId, KeyMaterial};
use crate::timestamp::{TimestampError, TimestampSnafu};
use crate::types::CertClass;
use jiff::Timestamp;
use sha1::{Digest, Sha1};
use snafu::{ResultExt, Snafu};

/// Builds one certification over a serialized key/user-id payload.
pub struct CertificationBuilder {
    class: CertClass,

    /// If value is None, timestamp will be set when the statement is signed
    timestamp: Option<Timestamp>,

    expires_at: Option<Timestamp>,

    exportable: bool,

    trust: Option<(u8, u8)>,

    scope: Option<String>,

    primary_uid: bool,

    notations: Vec<Notation>,
}

#[derive(Debug, Snafu)]
pub enum CertificationBuilderError {
    #[snafu(display("expiration {expiration} is before timestamp {timestamp}"))]
    PastExpiration {
        expiration: Timestamp,
        timestamp: Timestamp,
    },
    #[snafu(display("trust scope is not a valid pattern"))]
    InvalidScope { source: regex::Error },
    #[snafu(display("{source}"))]
    Backend { source: BackendError },
}

impl CertificationBuilder {
    pub fn new(class: CertClass) -> Self {
        Self {
            class,
            timestamp: None,
            expires_at: None,
            exportable: true,
            trust: None,
            scope: None,
            primary_uid: false,
            notations: Vec::new(),
        }
    }

    /// This timestamp **will be** bound into the statement.
    pub fn timestamp(mut self, timestamp: i64) -> Result<Self, TimestampError> {
        let timestamp = Timestamp::from_second(timestamp).context(TimestampSnafu { timestamp })?;
        self.timestamp = Some(timestamp);
        Ok(self)
    }

    pub fn expiration(mut self, timestamp: i64) -> Result<Self, TimestampError> {
        let timestamp = Timestamp::from_second(timestamp).context(TimestampSnafu { timestamp })?;
        self.expires_at = Some(timestamp);
        Ok(self)
    }

    pub fn expires_at(mut self, timestamp: Option<Timestamp>) -> Self {
        self.expires_at = timestamp;
        self
    }

    /// Mark the certification non-exportable (kept out of every export).
    pub fn local(mut self) -> Self {
        self.exportable = false;
        self
    }

    /// Delegate introducer status: `depth` hops, trust amount `value`
    /// (60 marginal, 120 full).
    pub fn trust(mut self, depth: u8, value: u8) -> Self {
        self.trust = Some((depth, value));
        self
    }

    /// Constrain which user ids the delegate may certify. The pattern must
    /// compile; it is matched against raw user id strings.
    pub fn scope(mut self, pattern: &str) -> Result<Self, CertificationBuilderError> {
        regex::Regex::new(pattern).context(InvalidScopeSnafu)?;
        self.scope = Some(pattern.to_owned());
        Ok(self)
    }

    pub fn primary(mut self) -> Self {
        self.primary_uid = true;
        self
    }

    pub fn notation(mut self, name: &str, value: &str, human_readable: bool) -> Self {
        self.notations.push(Notation {
            name: name.to_owned(),
            value: value.to_owned(),
            human_readable,
        });
        self
    }

    /// Sign `payload` with the given key through the backend and assemble
    /// the certification record.
    pub fn issue(
        self,
        signer: KeyId,
        signer_material: &KeyMaterial,
        payload: &[u8],
        backend: &dyn Backend,
    ) -> Result<Certification, CertificationBuilderError> {
        let timestamp = self.timestamp.unwrap_or(Timestamp::now());
        if let Some(expiration) = self.expires_at {
            (timestamp <= expiration).then_some(()).ok_or(
                CertificationBuilderError::PastExpiration {
                    expiration,
                    timestamp,
                },
            )?;
        }

        // Bind the creation time into the digest along with the payload
        let digest = {
            let mut hasher = Sha1::new();
            hasher.update(payload);
            hasher.update((timestamp.as_second() as u32).to_be_bytes());
            hasher.finalize()
        };

        let sig_bytes = backend
            .sign_digest(signer_material, &digest)
            .context(BackendSnafu)?;

        let (trust_depth, trust_value) = self.trust.unwrap_or((0, 0));
        Ok(Certification {
            signer,
            class: self.class,
            created_at: timestamp,
            expires_at: self.expires_at,
            exportable: self.exportable,
            revoked: false,
            trust_depth,
            trust_value,
            trust_scope: self.scope,
            primary_uid: self.primary_uid,
            notations: self.notations,
            sig_bytes,
        })
    }
}
