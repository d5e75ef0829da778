//! The boundary to the cryptographic backend: typed request/response with
//! coded errors, plus the read-only engine description records.

use crate::key::KeyMaterial;
use crate::types::{KeyAlgorithm, Protocol};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use snafu::Snafu;
use std::path::PathBuf;

/// Error domains surfaced by a backend. `Eof` terminates iterative listing
/// flows and is not a true error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoError,
    Eof,
    InvalidValue,
    GeneralError,
    UnusablePubkey,
    UnusableSeckey,
    NoPassphrase,
}

impl ErrorCode {
    pub fn is_eof(self) -> bool {
        self == Self::Eof
    }
}

/// Opaque backend failure, surfaced verbatim as code plus message.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(display("backend error ({code:?}): {message}"))]
pub struct BackendError {
    code: ErrorCode,
    message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        BackendSnafu {
            code,
            message: message.into(),
        }
        .build()
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// End-of-iteration sentinel, not a failure.
    pub fn is_eof(&self) -> bool {
        self.code.is_eof()
    }
}

/// Cryptographic operations delegated out of the engine.
pub trait Backend: Send + Sync {
    fn engine_info(&self) -> EngineInfo;

    /// Produce fresh key material for the given algorithm.
    fn generate_material(&self, algorithm: KeyAlgorithm) -> Result<KeyMaterial, BackendError>;

    /// Sign a digest with the secret half of `material`.
    fn sign_digest(&self, material: &KeyMaterial, digest: &[u8]) -> Result<Vec<u8>, BackendError>;
}

/// In-process backend fabricating deterministic signatures. It stands in for
/// an out-of-process engine; it performs no real asymmetric cryptography.
#[derive(Debug, Default)]
pub struct LoopbackBackend {
    home_dir: Option<PathBuf>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_home_dir(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home_dir.into()),
        }
    }
}

impl Backend for LoopbackBackend {
    fn engine_info(&self) -> EngineInfo {
        EngineInfo {
            protocol: Protocol::OpenPgp,
            file_name: "loopback".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            required_version: "1.0.0".to_owned(),
            home_dir: self.home_dir.clone(),
        }
    }

    #[cfg(feature = "generate")]
    fn generate_material(&self, algorithm: KeyAlgorithm) -> Result<KeyMaterial, BackendError> {
        use rand_core::{OsRng, RngCore};

        let public_len = match algorithm {
            KeyAlgorithm::Rsa { bits } => (bits as usize) / 8,
            KeyAlgorithm::EdDsa | KeyAlgorithm::Ecdh => 32,
        };
        let mut public = vec![0u8; public_len];
        OsRng.fill_bytes(&mut public);
        if let KeyAlgorithm::Rsa { .. } = algorithm {
            // keep the modulus at its nominal bit length
            public[0] |= 0x80;
        }
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Ok(KeyMaterial::with_secret(public, secret, false))
    }

    #[cfg(not(feature = "generate"))]
    fn generate_material(&self, _algorithm: KeyAlgorithm) -> Result<KeyMaterial, BackendError> {
        Err(BackendError::new(
            ErrorCode::GeneralError,
            "key generation support is not compiled in",
        ))
    }

    fn sign_digest(&self, material: &KeyMaterial, digest: &[u8]) -> Result<Vec<u8>, BackendError> {
        let secret = material.secret.as_deref().ok_or_else(|| {
            BackendError::new(ErrorCode::UnusableSeckey, "no secret material present")
        })?;

        // Deterministic 64-byte pseudo-signature chained from the secret.
        let mut out = Vec::with_capacity(64);
        let mut block: [u8; 20] = {
            let mut hasher = Sha1::new();
            hasher.update(secret);
            hasher.update(digest);
            hasher.finalize().into()
        };
        out.extend_from_slice(&block);
        while out.len() < 64 {
            let mut hasher = Sha1::new();
            hasher.update(block);
            hasher.update(digest);
            block = hasher.finalize().into();
            out.extend_from_slice(&block);
        }
        out.truncate(64);
        Ok(out)
    }
}

/// Describes one backend: read-only, queried not mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub protocol: Protocol,
    pub file_name: String,
    pub version: String,
    pub required_version: String,
    pub home_dir: Option<PathBuf>,
}

/// Process-level configuration handed in by the embedding application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub home_dir: Option<PathBuf>,
    /// Locale category/value pairs forwarded to pinentry.
    pub locale: Vec<(String, String)>,
    pub debug_level: u8,
    pub log_path: Option<PathBuf>,
    /// Alternative engine binary name, if the embedder overrides it.
    pub gnupg_name: Option<String>,
}

impl EngineConfig {
    pub fn with_home_dir(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home_dir.into());
        self
    }

    pub fn with_locale(mut self, category: &str, value: &str) -> Self {
        self.locale.push((category.to_owned(), value.to_owned()));
        self
    }
}

/// The engines this build knows about.
pub fn engine_info() -> Vec<EngineInfo> {
    vec![LoopbackBackend::default().engine_info()]
}
