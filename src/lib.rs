//! An OpenPGP key store and web-of-trust engine.
//!
//! The crate keeps keys, subkeys, user ids and certifications in an
//! in-memory [`KeyStore`], serializes them through an RFC 4880 packet
//! codec with ASCII armor, computes user id validity from the
//! certification graph, and exposes the whole surface through a
//! [`Session`] with synchronous and start/wait execution. Asymmetric
//! cryptography is delegated through the [`Backend`] seam; the bundled
//! [`LoopbackBackend`] fabricates deterministic stand-in signatures.

mod armor;
mod certification;
mod engine;
mod key;
pub mod lifecycle;
mod packet;
mod session;
mod store;
mod timestamp;
mod trust;
mod types;
mod userid;

pub use armor::{dearmor, enarmor, is_armored, ArmorKind};
pub use certification::builder::CertificationBuilder;
pub use certification::{Certification, Notation};
pub use engine::{
    engine_info, Backend, BackendError, EngineConfig, EngineInfo, ErrorCode, LoopbackBackend,
};
pub use key::{Fingerprint, Key, KeyHandle, KeyId, KeyMaterial, RevocationKey, Subkey};
pub use packet::{decode_key, decode_keys, encode_key, EncodeOptions, PacketReader, RawPacket};
pub use session::{
    CertificationRecord, ImportResult, KeyRecord, OpResult, Session, SessionState, SubkeyRecord,
    UserIdRecord,
};
pub use store::{KeyStore, PatternScan};
pub use trust::{resolve_trust_input, TrustConfig, TrustEngine};
pub use types::{
    CertClass, CertifyFlags, CreateFlags, DeleteFlags, ExportMode, KeyAlgorithm, KeyCapabilities,
    KeylistMode, PinentryMode, Protocol, TrustInput, TrustLevel,
};
pub use userid::{TofuStats, UserId};

pub mod error {
    pub use crate::armor::ArmorError;
    pub use crate::certification::builder::CertificationBuilderError;
    pub use crate::engine::BackendError;
    pub use crate::key::KeyError;
    pub use crate::lifecycle::LifecycleError;
    pub use crate::packet::PacketError;
    pub use crate::session::SessionError;
    pub use crate::store::StoreError;
    pub use crate::timestamp::TimestampError;
    pub use crate::trust::TrustError;
    pub use crate::userid::UserIdError;
}
