use crate::certification::Certification;
use crate::types::TrustLevel;
use jiff::Timestamp;
use regex::Regex;
use snafu::Snafu;
use std::sync::LazyLock;

/// `Name <email>` with an optional parenthesized comment. Anchored so the
/// whole string must match.
static UID_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^()<>]+?)(?:\s+\(([^()]+)\))?\s+<([^<>@\s]+@[^<>\s]+)>$")
        .expect("user id syntax pattern")
});

#[derive(Debug, PartialEq, Snafu)]
pub enum UserIdError {
    #[snafu(display(
        "user id {uid:?} does not match \"Name <email>\" or \"Name (Comment) <email>\""
    ))]
    InvalidUserIdFormat { uid: String },
}

/// Time-of-first-use statistics carried per user id.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TofuStats {
    pub sign_count: u64,
    pub encrypt_count: u64,
    #[serde(with = "crate::timestamp::optional")]
    pub first_seen: Option<Timestamp>,
    #[serde(with = "crate::timestamp::optional")]
    pub last_seen: Option<Timestamp>,
}

/// An identity claim bound to a key. Certifications over this claim are
/// owned here and nowhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct UserId {
    pub(crate) raw: String,
    pub(crate) name: String,
    pub(crate) comment: Option<String>,
    pub(crate) email: String,
    pub(crate) validity: TrustLevel,
    pub(crate) primary: bool,
    pub(crate) revoked: bool,
    pub(crate) tofu: Option<TofuStats>,
    pub(crate) certifications: Vec<Certification>,
}

impl UserId {
    /// Parse a user id string, enforcing the `Name <email>` shape.
    pub fn parse(raw: &str) -> Result<Self, UserIdError> {
        let captures = UID_SYNTAX
            .captures(raw.trim())
            .ok_or_else(|| UserIdError::InvalidUserIdFormat { uid: raw.to_owned() })?;

        let name = captures[1].trim().to_owned();
        if name.is_empty() {
            return Err(UserIdError::InvalidUserIdFormat { uid: raw.to_owned() });
        }

        Ok(Self {
            raw: raw.trim().to_owned(),
            name,
            comment: captures.get(2).map(|m| m.as_str().trim().to_owned()),
            email: captures[3].to_owned(),
            validity: TrustLevel::Unknown,
            primary: false,
            revoked: false,
            tofu: None,
            certifications: Vec::new(),
        })
    }

    /// Lenient constructor for imported material: a claim that does not
    /// match the strict shape keeps its raw form with empty parts.
    pub(crate) fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| Self {
            raw: raw.to_owned(),
            name: raw.to_owned(),
            comment: None,
            email: String::new(),
            validity: TrustLevel::Unknown,
            primary: false,
            revoked: false,
            tofu: None,
            certifications: Vec::new(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn validity(&self) -> TrustLevel {
        self.validity
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn tofu(&self) -> Option<&TofuStats> {
        self.tofu.as_ref()
    }

    pub fn certifications(&self) -> &[Certification] {
        &self.certifications
    }

    /// Flag this user id primary. The marker also lands on the newest live
    /// self-certification so it survives export and import.
    pub(crate) fn set_primary(&mut self, self_key: crate::key::KeyId) {
        self.primary = true;
        if self.certifications.iter().any(|cert| cert.primary_uid) {
            return;
        }
        if let Some(self_cert) = self
            .certifications
            .iter_mut()
            .rev()
            .find(|cert| cert.signer == self_key && !cert.revoked)
        {
            self_cert.primary_uid = true;
        }
    }

    pub(crate) fn clear_primary(&mut self) {
        self.primary = false;
        for cert in &mut self.certifications {
            cert.primary_uid = false;
        }
    }

    pub(crate) fn revoke(&mut self) {
        self.revoked = true;
        self.primary = false;
        for cert in &mut self.certifications {
            cert.primary_uid = false;
        }
    }

    /// Merge certifications of another copy of this user id. Returns whether
    /// anything changed.
    pub(crate) fn merge(&mut self, other: UserId) -> bool {
        let mut changed = false;
        if other.revoked && !self.revoked {
            self.revoked = true;
            changed = true;
        }
        for incoming in other.certifications {
            match self
                .certifications
                .iter_mut()
                .find(|existing| existing.same_statement(&incoming))
            {
                Some(existing) => {
                    if incoming.revoked && !existing.revoked {
                        existing.revoked = true;
                        changed = true;
                    }
                }
                None => {
                    self.certifications.push(incoming);
                    changed = true;
                }
            }
        }
        changed
    }
}
