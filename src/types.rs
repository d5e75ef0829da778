//! Shared enums and flag sets used across the engine.

use serde::{Deserialize, Serialize};

/// Which engine protocol a key or session speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    OpenPgp,
    Cms,
}

/// The six-step trust scale, used both for owner trust (a local statement
/// about a key holder) and computed validity (what the certification graph
/// supports for a user id).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    #[default]
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
}

impl TrustLevel {
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Unknown),
            1 => Some(Self::Undefined),
            2 => Some(Self::Never),
            3 => Some(Self::Marginal),
            4 => Some(Self::Full),
            5 => Some(Self::Ultimate),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "undefined" => Some(Self::Undefined),
            "never" => Some(Self::Never),
            "marginal" => Some(Self::Marginal),
            "full" => Some(Self::Full),
            "ultimate" => Some(Self::Ultimate),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Undefined => "undefined",
            Self::Never => "never",
            Self::Marginal => "marginal",
            Self::Full => "full",
            Self::Ultimate => "ultimate",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Owner trust input as accepted at the call boundary: a named level or its
/// ordinal. Resolution lives in the trust engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustInput {
    Named(String),
    Ordinal(i64),
}

impl From<&str> for TrustInput {
    fn from(value: &str) -> Self {
        Self::Named(value.to_owned())
    }
}

impl From<String> for TrustInput {
    fn from(value: String) -> Self {
        Self::Named(value)
    }
}

impl From<i64> for TrustInput {
    fn from(value: i64) -> Self {
        Self::Ordinal(value)
    }
}

impl From<TrustLevel> for TrustInput {
    fn from(value: TrustLevel) -> Self {
        Self::Ordinal(value.ordinal() as i64)
    }
}

bitflags::bitflags! {
    /// What a (sub)key is allowed to do.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct KeyCapabilities: u8 {
        const CERTIFY = 0b0000_0001;
        const SIGN    = 0b0000_0010;
        const ENCRYPT = 0b0000_0100;
        const AUTH    = 0b0000_1000;
    }

    /// Flags accepted by `create_key`/`create_subkey`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CreateFlags: u16 {
        const SIGN          = 0b0000_0000_0001;
        const ENCRYPT       = 0b0000_0000_0010;
        const CERTIFY       = 0b0000_0000_0100;
        const AUTH          = 0b0000_0000_1000;
        const NO_PASSPHRASE = 0b0000_0001_0000;
        const NO_EXPIRE     = 0b0000_0010_0000;
        const SELF_SIGNED   = 0b0000_0100_0000;
    }

    /// Flags accepted by `sign_key`/`revoke_signature`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CertifyFlags: u8 {
        /// Mark the certification non-exportable.
        const LOCAL    = 0b0000_0001;
        const NOEXPIRE = 0b0000_0010;
        /// Bypass the duplicate-signature check.
        const FORCE    = 0b0000_0100;
    }

    /// Flags accepted by `delete_key`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DeleteFlags: u8 {
        const ALLOW_SECRET = 0b0000_0001;
        const FORCE        = 0b0000_0010;
    }

    /// What a key listing includes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeylistMode: u32 {
        const LOCAL         = 0b0000_0000_0001;
        const EXTERN        = 0b0000_0000_0010;
        const SIGS          = 0b0000_0000_0100;
        const SIG_NOTATIONS = 0b0000_0000_1000;
        const WITH_SECRET   = 0b0000_0001_0000;
        const WITH_TOFU     = 0b0000_0010_0000;
        const WITH_KEYGRIP  = 0b0000_0100_0000;
        const EPHEMERAL     = 0b0000_1000_0000;
        const VALIDATE      = 0b0001_0000_0000;
        const FORCE_EXTERN  = 0b0010_0000_0000;
        const WITH_V5FPR    = 0b0100_0000_0000;
    }

    /// Export behavior.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ExportMode: u32 {
        /// Push to an external keyserver instead of a local sink.
        const EXTERN  = 0b0000_0001;
        /// Strip every certification except self-certifications.
        const MINIMAL = 0b0000_0010;
    }
}

impl Default for KeylistMode {
    fn default() -> Self {
        Self::LOCAL
    }
}

impl CreateFlags {
    /// The capability subset of the flag word.
    pub fn capabilities(self) -> KeyCapabilities {
        let mut caps = KeyCapabilities::empty();
        if self.contains(Self::SIGN) {
            caps |= KeyCapabilities::SIGN;
        }
        if self.contains(Self::ENCRYPT) {
            caps |= KeyCapabilities::ENCRYPT;
        }
        if self.contains(Self::CERTIFY) {
            caps |= KeyCapabilities::CERTIFY;
        }
        if self.contains(Self::AUTH) {
            caps |= KeyCapabilities::AUTH;
        }
        caps
    }
}

/// How passphrase prompts are resolved for operations needing secret material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinentryMode {
    #[default]
    Default,
    Ask,
    Cancel,
    Error,
    Loopback,
}

/// Certification class, mirroring the OpenPGP signature type octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertClass {
    Generic = 0x10,
    Persona = 0x11,
    Casual = 0x12,
    Positive = 0x13,
}

impl CertClass {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::Generic),
            0x11 => Some(Self::Persona),
            0x12 => Some(Self::Casual),
            0x13 => Some(Self::Positive),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Public key algorithm of a (sub)key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa { bits: u16 },
    EdDsa,
    Ecdh,
}

impl KeyAlgorithm {
    /// Resolve a name from the fixed algorithm table.
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "rsa2048" => Some(Self::Rsa { bits: 2048 }),
            "rsa3072" => Some(Self::Rsa { bits: 3072 }),
            "rsa4096" => Some(Self::Rsa { bits: 4096 }),
            "ed25519" => Some(Self::EdDsa),
            "cv25519" => Some(Self::Ecdh),
            "future-default" => Some(Self::EdDsa),
            _ => None,
        }
    }

    /// RFC 4880/6637 algorithm id octet.
    pub fn id(self) -> u8 {
        match self {
            Self::Rsa { .. } => 1,
            Self::Ecdh => 18,
            Self::EdDsa => 22,
        }
    }

    pub fn from_id(id: u8, bits: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Rsa { bits }),
            18 => Some(Self::Ecdh),
            22 => Some(Self::EdDsa),
            _ => None,
        }
    }

    /// Key length in bits; fixed at 255 for the Curve25519 algorithms.
    pub fn bits(self) -> u16 {
        match self {
            Self::Rsa { bits } => bits,
            Self::EdDsa | Self::Ecdh => 255,
        }
    }

    pub fn curve(self) -> Option<&'static str> {
        match self {
            Self::Rsa { .. } => None,
            Self::EdDsa => Some("ed25519"),
            Self::Ecdh => Some("cv25519"),
        }
    }

    /// Which capabilities the algorithm can carry at all.
    pub fn supported_capabilities(self) -> KeyCapabilities {
        match self {
            Self::Rsa { .. } => {
                KeyCapabilities::CERTIFY
                    | KeyCapabilities::SIGN
                    | KeyCapabilities::ENCRYPT
                    | KeyCapabilities::AUTH
            }
            Self::EdDsa => {
                KeyCapabilities::CERTIFY | KeyCapabilities::SIGN | KeyCapabilities::AUTH
            }
            Self::Ecdh => KeyCapabilities::ENCRYPT,
        }
    }

    /// Capabilities assigned when the caller requests none explicitly.
    pub fn default_capabilities(self, primary: bool) -> KeyCapabilities {
        match self {
            Self::Rsa { .. } | Self::EdDsa if primary => {
                KeyCapabilities::SIGN | KeyCapabilities::CERTIFY
            }
            Self::Rsa { .. } | Self::EdDsa => KeyCapabilities::SIGN,
            Self::Ecdh => KeyCapabilities::ENCRYPT,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { bits } => write!(f, "rsa{bits}"),
            Self::EdDsa => f.write_str("ed25519"),
            Self::Ecdh => f.write_str("cv25519"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_level_ordinals_round_trip() {
        for ordinal in 0..=5 {
            let level = TrustLevel::from_ordinal(ordinal).unwrap();
            assert_eq!(level.ordinal() as i64, ordinal);
            assert_eq!(TrustLevel::from_name(level.name()), Some(level));
        }
        assert_eq!(TrustLevel::from_ordinal(6), None);
        assert_eq!(TrustLevel::from_ordinal(-1), None);
        assert_eq!(TrustLevel::from_name("sorta"), None);
    }

    #[test]
    fn trust_level_names_are_case_insensitive() {
        assert_eq!(TrustLevel::from_name("Ultimate"), Some(TrustLevel::Ultimate));
        assert_eq!(TrustLevel::from_name("MARGINAL"), Some(TrustLevel::Marginal));
    }

    #[test]
    fn trust_scale_is_ordered() {
        assert!(TrustLevel::Unknown < TrustLevel::Marginal);
        assert!(TrustLevel::Marginal < TrustLevel::Full);
        assert!(TrustLevel::Full < TrustLevel::Ultimate);
    }

    #[test]
    fn algorithm_table() {
        assert_eq!(
            KeyAlgorithm::resolve("rsa2048"),
            Some(KeyAlgorithm::Rsa { bits: 2048 })
        );
        assert_eq!(KeyAlgorithm::resolve("ed25519"), Some(KeyAlgorithm::EdDsa));
        assert_eq!(KeyAlgorithm::resolve("cv25519"), Some(KeyAlgorithm::Ecdh));
        assert_eq!(
            KeyAlgorithm::resolve("future-default"),
            Some(KeyAlgorithm::EdDsa)
        );
        assert_eq!(KeyAlgorithm::resolve("rot13"), None);
    }

    #[test]
    fn ecdh_cannot_sign() {
        assert!(!KeyAlgorithm::Ecdh
            .supported_capabilities()
            .contains(KeyCapabilities::SIGN));
        assert!(KeyAlgorithm::EdDsa
            .supported_capabilities()
            .contains(KeyCapabilities::CERTIFY));
    }

    #[test]
    fn create_flags_extract_capabilities() {
        let flags = CreateFlags::SIGN | CreateFlags::CERTIFY | CreateFlags::NO_PASSPHRASE;
        assert_eq!(
            flags.capabilities(),
            KeyCapabilities::SIGN | KeyCapabilities::CERTIFY
        );
        assert_eq!(CreateFlags::NO_EXPIRE.capabilities(), KeyCapabilities::empty());
    }
}
