//! Streaming packet decoding. Unknown packet types and signature classes
//! are skipped for forward compatibility; truncated or self-contradictory
//! lengths fail hard.

use super::{
    capabilities_from_rfc_flags, revocation_key_from_subpacket, PacketError, SIG_CERT_REVOCATION,
    SIG_DIRECT_KEY, SIG_KEY_REVOCATION, SIG_SUBKEY_BINDING, SP_CREATION_TIME, SP_EXPORTABLE,
    SP_ISSUER, SP_KEY_EXPIRATION, SP_KEY_FLAGS, SP_NOTATION, SP_PRIMARY_UID, SP_REVOCATION_KEY,
    SP_SCOPE, SP_SIG_EXPIRATION, SP_TRUST, TAG_PUBLIC_KEY, TAG_PUBLIC_SUBKEY, TAG_SECRET_KEY,
    TAG_SECRET_SUBKEY, TAG_SIGNATURE, TAG_USER_ID,
};
use crate::certification::{Certification, Notation};
use crate::key::{Key, KeyId, KeyMaterial, RevocationKey, Subkey};
use crate::types::{CertClass, KeyAlgorithm, Protocol, TrustLevel};
use crate::userid::UserId;
use byteorder::{BigEndian, ByteOrder};
use jiff::Timestamp;

/// One undecoded packet: its tag and body octets.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub tag: u8,
    pub body: &'a [u8],
}

/// Pulls packets off a byte slice one at a time.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next packet, or `None` at a clean end of stream.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket<'a>>, PacketError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        let rest = &self.data[self.pos..];
        let header = rest[0];
        if header & 0x80 == 0 {
            return Err(PacketError::MalformedPacket {
                reason: "packet header bit not set",
            });
        }

        let (tag, header_len, body_len): (u8, usize, usize) = if header & 0x40 != 0 {
            // new format
            let tag = header & 0x3f;
            let first = *rest.get(1).ok_or(PacketError::Truncated)?;
            match first {
                0..=191 => (tag, 2, first as usize),
                192..=223 => {
                    let second = *rest.get(2).ok_or(PacketError::Truncated)?;
                    (tag, 3, (first as usize - 192) * 256 + second as usize + 192)
                }
                255 => {
                    if rest.len() < 6 {
                        return Err(PacketError::Truncated);
                    }
                    (tag, 6, BigEndian::read_u32(&rest[2..6]) as usize)
                }
                // partial body lengths
                _ => return Err(PacketError::UnsupportedPacketLength),
            }
        } else {
            let tag = (header >> 2) & 0x0f;
            match header & 0b11 {
                0 => {
                    let len = *rest.get(1).ok_or(PacketError::Truncated)? as usize;
                    (tag, 2, len)
                }
                1 => {
                    if rest.len() < 3 {
                        return Err(PacketError::Truncated);
                    }
                    (tag, 3, BigEndian::read_u16(&rest[1..3]) as usize)
                }
                2 => {
                    if rest.len() < 5 {
                        return Err(PacketError::Truncated);
                    }
                    (tag, 5, BigEndian::read_u32(&rest[1..5]) as usize)
                }
                _ => return Err(PacketError::UnsupportedPacketLength),
            }
        };

        let end = header_len
            .checked_add(body_len)
            .ok_or(PacketError::Truncated)?;
        if rest.len() < end {
            return Err(PacketError::Truncated);
        }
        self.pos += end;
        Ok(Some(RawPacket {
            tag,
            body: &rest[header_len..end],
        }))
    }
}

fn read_mpi<'a>(body: &'a [u8], pos: &mut usize) -> Result<&'a [u8], PacketError> {
    if body.len() < *pos + 2 {
        return Err(PacketError::MalformedPacket {
            reason: "truncated multi-precision integer",
        });
    }
    let bits = BigEndian::read_u16(&body[*pos..*pos + 2]) as usize;
    let nbytes = bits.div_ceil(8);
    let start = *pos + 2;
    if body.len() < start + nbytes {
        return Err(PacketError::MalformedPacket {
            reason: "multi-precision integer overruns packet",
        });
    }
    *pos = start + nbytes;
    Ok(&body[start..start + nbytes])
}

struct ParsedKeyPacket {
    material: KeyMaterial,
    algorithm: KeyAlgorithm,
    created_at: Timestamp,
    secret_present: bool,
}

fn parse_key_body(body: &[u8], secret_tag: bool) -> Result<ParsedKeyPacket, PacketError> {
    if body.len() < 6 {
        return Err(PacketError::MalformedPacket {
            reason: "key packet too short",
        });
    }
    if body[0] != 4 {
        return Err(PacketError::MalformedPacket {
            reason: "unsupported key packet version",
        });
    }
    let created_at = Timestamp::from_second(BigEndian::read_u32(&body[1..5]) as i64)
        .map_err(|_| PacketError::MalformedPacket {
            reason: "key creation time out of range",
        })?;
    let algo_id = body[5];
    let mut pos = 6;

    let (public, algorithm) = match algo_id {
        1 => {
            let n = read_mpi(body, &mut pos)?;
            let bits = n.len() * 8;
            let _e = read_mpi(body, &mut pos)?;
            (n.to_vec(), KeyAlgorithm::Rsa { bits: bits as u16 })
        }
        18 | 22 => {
            let oid_len = *body.get(pos).ok_or(PacketError::MalformedPacket {
                reason: "missing curve identifier",
            })? as usize;
            pos += 1;
            if body.len() < pos + oid_len {
                return Err(PacketError::MalformedPacket {
                    reason: "curve identifier overruns packet",
                });
            }
            pos += oid_len;
            let point = read_mpi(body, &mut pos)?;
            let public = match point.first() {
                Some(0x40) => point[1..].to_vec(),
                _ => point.to_vec(),
            };
            if algo_id == 18 {
                // KDF parameters
                if let Some(&kdf_len) = body.get(pos) {
                    pos += 1 + kdf_len as usize;
                }
            }
            let algorithm = if algo_id == 22 {
                KeyAlgorithm::EdDsa
            } else {
                KeyAlgorithm::Ecdh
            };
            (public, algorithm)
        }
        _ => {
            return Err(PacketError::MalformedPacket {
                reason: "unsupported public key algorithm",
            })
        }
    };

    let mut material = KeyMaterial::public_only(public);
    let mut secret_present = false;
    if secret_tag {
        secret_present = true;
        match body.get(pos) {
            Some(0) => {
                pos += 1;
                let secret = read_mpi(body, &mut pos)?;
                material.secret = Some(secret.to_vec());
            }
            Some(_) => {
                // passphrase-protected material we cannot unwrap locally
                material.protected = true;
            }
            None => {
                return Err(PacketError::MalformedPacket {
                    reason: "secret key packet without secret data",
                })
            }
        }
    }

    Ok(ParsedKeyPacket {
        material,
        algorithm,
        created_at,
        secret_present,
    })
}

#[derive(Default)]
struct SigInfo {
    class: u8,
    created_at: Option<Timestamp>,
    expires_delta: Option<u64>,
    key_expiry_delta: Option<u64>,
    exportable: bool,
    trust: (u8, u8),
    scope: Option<String>,
    primary_uid: bool,
    key_flags: Option<u8>,
    issuer: Option<KeyId>,
    revocation_keys: Vec<RevocationKey>,
    notations: Vec<Notation>,
    sig_bytes: Vec<u8>,
}

fn parse_subpackets(area: &[u8], info: &mut SigInfo) -> Result<(), PacketError> {
    let mut pos = 0;
    while pos < area.len() {
        let first = area[pos];
        let (len, header) = match first {
            0..=191 => (first as usize, 1),
            192..=254 => {
                let second = *area.get(pos + 1).ok_or(PacketError::MalformedPacket {
                    reason: "truncated subpacket length",
                })?;
                ((first as usize - 192) * 256 + second as usize + 192, 2)
            }
            255 => {
                if area.len() < pos + 5 {
                    return Err(PacketError::MalformedPacket {
                        reason: "truncated subpacket length",
                    });
                }
                (BigEndian::read_u32(&area[pos + 1..pos + 5]) as usize, 5)
            }
        };
        if len == 0 {
            return Err(PacketError::MalformedPacket {
                reason: "zero-length subpacket",
            });
        }
        let start = pos + header;
        if area.len() < start + len {
            return Err(PacketError::MalformedPacket {
                reason: "subpacket overruns signature",
            });
        }
        let sp_type = area[start] & 0x7f;
        let data = &area[start + 1..start + len];
        pos = start + len;

        match sp_type {
            SP_CREATION_TIME if data.len() == 4 => {
                info.created_at = Timestamp::from_second(BigEndian::read_u32(data) as i64).ok();
            }
            SP_SIG_EXPIRATION if data.len() == 4 => {
                info.expires_delta = Some(BigEndian::read_u32(data) as u64);
            }
            SP_EXPORTABLE if !data.is_empty() => {
                info.exportable = data[0] != 0;
            }
            SP_TRUST if data.len() == 2 => {
                info.trust = (data[0], data[1]);
            }
            SP_SCOPE => {
                let text = data.strip_suffix(&[0]).unwrap_or(data);
                info.scope = Some(String::from_utf8_lossy(text).into_owned());
            }
            SP_KEY_EXPIRATION if data.len() == 4 => {
                info.key_expiry_delta = Some(BigEndian::read_u32(data) as u64);
            }
            SP_REVOCATION_KEY => {
                if let Some(revoker) = revocation_key_from_subpacket(data) {
                    info.revocation_keys.push(revoker);
                }
            }
            SP_ISSUER if data.len() == 8 => {
                let mut id = [0u8; 8];
                id.copy_from_slice(data);
                info.issuer = Some(KeyId::from(id));
            }
            SP_NOTATION if data.len() >= 8 => {
                let name_len = BigEndian::read_u16(&data[4..6]) as usize;
                let value_len = BigEndian::read_u16(&data[6..8]) as usize;
                if data.len() == 8 + name_len + value_len {
                    info.notations.push(Notation {
                        name: String::from_utf8_lossy(&data[8..8 + name_len]).into_owned(),
                        value: String::from_utf8_lossy(&data[8 + name_len..]).into_owned(),
                        human_readable: data[0] & 0x80 != 0,
                    });
                }
            }
            SP_PRIMARY_UID if !data.is_empty() => {
                info.primary_uid = data[0] != 0;
            }
            SP_KEY_FLAGS if !data.is_empty() => {
                info.key_flags = Some(data[0]);
            }
            _ => log::debug!("skipping unknown signature subpacket type {sp_type}"),
        }
    }
    Ok(())
}

/// Parse a v4 signature packet body. Unsupported versions yield `Ok(None)`
/// and are skipped by the caller.
fn parse_signature(body: &[u8]) -> Result<Option<SigInfo>, PacketError> {
    if body.len() < 8 {
        return Err(PacketError::MalformedPacket {
            reason: "signature packet too short",
        });
    }
    if body[0] != 4 {
        return Ok(None);
    }
    let mut info = SigInfo {
        class: body[1],
        exportable: true,
        ..SigInfo::default()
    };

    let hashed_len = BigEndian::read_u16(&body[4..6]) as usize;
    if body.len() < 6 + hashed_len + 2 {
        return Err(PacketError::MalformedPacket {
            reason: "hashed subpackets overrun signature",
        });
    }
    parse_subpackets(&body[6..6 + hashed_len], &mut info)?;

    let unhashed_start = 6 + hashed_len;
    let unhashed_len = BigEndian::read_u16(&body[unhashed_start..unhashed_start + 2]) as usize;
    let mut pos = unhashed_start + 2;
    if body.len() < pos + unhashed_len {
        return Err(PacketError::MalformedPacket {
            reason: "unhashed subpackets overrun signature",
        });
    }
    parse_subpackets(&body[pos..pos + unhashed_len], &mut info)?;
    pos += unhashed_len;

    // two octets of hash prefix, then the signature MPIs
    if body.len() < pos + 2 {
        return Err(PacketError::MalformedPacket {
            reason: "missing hash prefix",
        });
    }
    pos += 2;
    while pos < body.len() {
        let mpi = read_mpi(body, &mut pos)?;
        info.sig_bytes.extend_from_slice(mpi);
    }

    Ok(Some(info))
}

enum Context {
    Primary,
    Uid(usize),
    Subkey(usize),
}

fn finalize(mut key: Key) -> Key {
    // the primary user id marker comes from the certifications
    let mut primary_seen = false;
    for uid in &mut key.userids {
        let marked = !uid.revoked
            && uid
                .certifications
                .iter()
                .any(|cert| cert.primary_uid && !cert.revoked);
        uid.primary = marked && !primary_seen;
        primary_seen |= uid.primary;
    }

    // subkeys without explicit key flags carry their algorithm defaults
    for (index, subkey) in key.subkeys.iter_mut().enumerate() {
        if subkey.capabilities.is_empty() {
            subkey.capabilities = subkey.algorithm.default_capabilities(index == 0);
        }
    }

    key
}

/// Decode every transferable key in the stream.
pub fn decode_keys(data: &[u8]) -> Result<Vec<Key>, PacketError> {
    let mut reader = PacketReader::new(data);
    let mut keys: Vec<Key> = Vec::new();
    let mut current: Option<Key> = None;
    let mut context = Context::Primary;

    while let Some(packet) = reader.next_packet()? {
        match packet.tag {
            TAG_PUBLIC_KEY | TAG_SECRET_KEY => {
                if let Some(done) = current.take() {
                    keys.push(finalize(done));
                }
                let parsed = parse_key_body(packet.body, packet.tag == TAG_SECRET_KEY)?;
                let primary = Subkey::assemble(
                    parsed.material,
                    parsed.algorithm,
                    parsed.created_at,
                    None,
                    crate::types::KeyCapabilities::empty(),
                );
                current = Some(Key {
                    protocol: Protocol::OpenPgp,
                    owner_trust: TrustLevel::Unknown,
                    revoked: false,
                    disabled: false,
                    invalid: false,
                    subkeys: vec![primary],
                    userids: Vec::new(),
                    revocation_keys: Vec::new(),
                });
                context = Context::Primary;
            }
            TAG_PUBLIC_SUBKEY | TAG_SECRET_SUBKEY => {
                let key = current.as_mut().ok_or(PacketError::MissingKeyPacket)?;
                let parsed = parse_key_body(packet.body, packet.tag == TAG_SECRET_SUBKEY)?;
                let subkey = Subkey::assemble(
                    parsed.material,
                    parsed.algorithm,
                    parsed.created_at,
                    None,
                    crate::types::KeyCapabilities::empty(),
                );
                key.subkeys.push(subkey);
                context = Context::Subkey(key.subkeys.len() - 1);
            }
            TAG_USER_ID => {
                let key = current.as_mut().ok_or(PacketError::MissingKeyPacket)?;
                let raw = String::from_utf8_lossy(packet.body);
                key.userids.push(UserId::parse_lenient(&raw));
                context = Context::Uid(key.userids.len() - 1);
            }
            TAG_SIGNATURE => {
                let key = current.as_mut().ok_or(PacketError::MissingKeyPacket)?;
                let Some(info) = parse_signature(packet.body)? else {
                    continue;
                };
                apply_signature(key, &context, info);
            }
            tag => log::debug!("skipping unknown packet tag {tag}"),
        }
    }

    if let Some(done) = current.take() {
        keys.push(finalize(done));
    }
    Ok(keys)
}

fn apply_signature(key: &mut Key, context: &Context, info: SigInfo) {
    let self_id = key.subkeys[0].fingerprint.key_id();
    match info.class {
        class if CertClass::from_byte(class).is_some() => {
            let Context::Uid(index) = context else {
                log::debug!("skipping certification outside a user id context");
                return;
            };
            let (Some(issuer), Some(created_at)) = (info.issuer, info.created_at) else {
                log::debug!("skipping certification without issuer or creation time");
                return;
            };
            let expires_at = info
                .expires_delta
                .and_then(|delta| Timestamp::from_second(created_at.as_second() + delta as i64).ok());
            let uid = &mut key.userids[*index];
            uid.certifications.push(Certification {
                signer: issuer,
                class: CertClass::from_byte(info.class).expect("matched above"),
                created_at,
                expires_at,
                exportable: info.exportable,
                revoked: false,
                trust_depth: info.trust.0,
                trust_value: info.trust.1,
                trust_scope: info.scope,
                primary_uid: info.primary_uid,
                notations: info.notations,
                sig_bytes: info.sig_bytes,
            });
        }
        SIG_DIRECT_KEY => {
            let primary = &mut key.subkeys[0];
            if let Some(flags) = info.key_flags {
                primary.capabilities = capabilities_from_rfc_flags(flags);
            }
            if let Some(delta) = info.key_expiry_delta {
                primary.expires_at =
                    Timestamp::from_second(primary.created_at.as_second() + delta as i64).ok();
            }
            key.revocation_keys.extend(info.revocation_keys);
        }
        SIG_SUBKEY_BINDING => {
            if let Context::Subkey(index) = context {
                let subkey = &mut key.subkeys[*index];
                if let Some(flags) = info.key_flags {
                    subkey.capabilities = capabilities_from_rfc_flags(flags);
                }
                if let Some(delta) = info.key_expiry_delta {
                    subkey.expires_at =
                        Timestamp::from_second(subkey.created_at.as_second() + delta as i64).ok();
                }
            }
        }
        SIG_KEY_REVOCATION => key.revoked = true,
        SIG_CERT_REVOCATION => {
            if let Context::Uid(index) = context {
                let uid = &mut key.userids[*index];
                if uid.certifications.is_empty() {
                    // revocation directly after the user id packet revokes the claim
                    if info.issuer.is_none() || info.issuer == Some(self_id) {
                        uid.revoked = true;
                    }
                } else {
                    let target = uid.certifications.iter_mut().rev().find(|cert| {
                        info.issuer.map_or(true, |issuer| cert.signer == issuer)
                    });
                    if let Some(cert) = target {
                        cert.revoked = true;
                    }
                }
            }
        }
        class => log::debug!("skipping signature of unhandled class {class:#04x}"),
    }
}

/// Decode the first transferable key in the stream.
pub fn decode_key(data: &[u8]) -> Result<Key, PacketError> {
    decode_keys(data)?
        .into_iter()
        .next()
        .ok_or(PacketError::MissingKeyPacket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_key, EncodeOptions};
    use crate::timestamp::parse_timestamp;
    use crate::types::KeyCapabilities;

    fn material(seed: u8) -> KeyMaterial {
        KeyMaterial::with_secret(vec![seed; 32], vec![seed ^ 0xff; 32], false)
    }

    fn test_key() -> Key {
        let created = parse_timestamp(1_700_000_000).unwrap();
        let primary = Subkey::assemble(
            material(0x11),
            KeyAlgorithm::EdDsa,
            created,
            None,
            KeyCapabilities::SIGN | KeyCapabilities::CERTIFY,
        );
        let self_id = primary.fingerprint.key_id();
        let mut uid = UserId::parse("Alice <alice@example.com>").unwrap();
        uid.primary = true;
        uid.certifications.push(Certification {
            signer: self_id,
            class: CertClass::Positive,
            created_at: created,
            expires_at: None,
            exportable: true,
            revoked: false,
            trust_depth: 0,
            trust_value: 0,
            trust_scope: None,
            primary_uid: true,
            notations: Vec::new(),
            sig_bytes: vec![0xab; 64],
        });
        Key::assemble(Protocol::OpenPgp, primary, uid)
    }

    #[test]
    fn round_trip_preserves_identity() {
        let key = test_key();
        let encoded = encode_key(&key, EncodeOptions::default());
        let decoded = decode_key(&encoded).unwrap();

        assert_eq!(decoded.fingerprint(), key.fingerprint());
        assert_eq!(decoded.userids().len(), 1);
        assert_eq!(decoded.userids()[0].raw(), "Alice <alice@example.com>");
        assert!(decoded.userids()[0].is_primary());
        assert_eq!(decoded.subkeys().len(), 1);
        assert_eq!(
            decoded.primary_subkey().capabilities(),
            KeyCapabilities::SIGN | KeyCapabilities::CERTIFY
        );
        assert!(!decoded.has_secret());
    }

    #[test]
    fn round_trip_with_subkey_and_expiry() {
        let mut key = test_key();
        let created = parse_timestamp(1_700_000_100).unwrap();
        let expires = parse_timestamp(1_700_000_100 + 86_400).unwrap();
        key.subkeys.push(Subkey::assemble(
            material(0x22),
            KeyAlgorithm::Ecdh,
            created,
            Some(expires),
            KeyCapabilities::ENCRYPT,
        ));

        let encoded = encode_key(&key, EncodeOptions::default());
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(decoded.subkeys().len(), 2);
        let subkey = &decoded.subkeys()[1];
        assert_eq!(subkey.fingerprint(), key.subkeys()[1].fingerprint());
        assert_eq!(subkey.algorithm(), KeyAlgorithm::Ecdh);
        assert_eq!(subkey.capabilities(), KeyCapabilities::ENCRYPT);
        assert_eq!(
            subkey.expires_at().map(|at| at.as_second()),
            Some(1_700_000_100 + 86_400)
        );
    }

    #[test]
    fn round_trip_secret_material() {
        let key = test_key();
        let encoded = encode_key(
            &key,
            EncodeOptions {
                with_secret: true,
                ..EncodeOptions::default()
            },
        );
        let decoded = decode_key(&encoded).unwrap();
        assert!(decoded.has_secret());
        assert_eq!(decoded.fingerprint(), key.fingerprint());
    }

    #[test]
    fn round_trip_revocations() {
        let mut key = test_key();
        key.revoked = true;
        key.userids[0].certifications[0].revoked = true;

        let encoded = encode_key(&key, EncodeOptions::default());
        let decoded = decode_key(&encoded).unwrap();
        assert!(decoded.is_revoked());
        assert!(decoded.userids()[0].certifications()[0].is_revoked());
        assert!(!decoded.userids()[0].is_revoked());
    }

    #[test]
    fn revoked_uid_survives_round_trip() {
        let mut key = test_key();
        key.userids[0].revoked = true;
        key.userids[0].primary = false;

        let encoded = encode_key(&key, EncodeOptions::default());
        let decoded = decode_key(&encoded).unwrap();
        assert!(decoded.userids()[0].is_revoked());
        assert_eq!(decoded.userids().len(), 1);
    }

    #[test]
    fn local_certifications_are_stripped() {
        let mut key = test_key();
        key.userids[0].certifications.push(Certification {
            signer: KeyId::from([9u8; 8]),
            class: CertClass::Generic,
            created_at: parse_timestamp(1_700_000_050).unwrap(),
            expires_at: None,
            exportable: false,
            revoked: false,
            trust_depth: 0,
            trust_value: 0,
            trust_scope: None,
            primary_uid: false,
            notations: Vec::new(),
            sig_bytes: vec![0xcd; 64],
        });

        let decoded = decode_key(&encode_key(&key, EncodeOptions::default())).unwrap();
        assert_eq!(decoded.userids()[0].certifications().len(), 1);

        let decoded = decode_key(&encode_key(
            &key,
            EncodeOptions {
                include_local: true,
                ..EncodeOptions::default()
            },
        ))
        .unwrap();
        assert_eq!(decoded.userids()[0].certifications().len(), 2);
    }

    #[test]
    fn minimal_export_strips_third_party_certifications() {
        let mut key = test_key();
        key.userids[0].certifications.push(Certification {
            signer: KeyId::from([9u8; 8]),
            class: CertClass::Generic,
            created_at: parse_timestamp(1_700_000_050).unwrap(),
            expires_at: None,
            exportable: true,
            revoked: false,
            trust_depth: 0,
            trust_value: 0,
            trust_scope: None,
            primary_uid: false,
            notations: Vec::new(),
            sig_bytes: vec![0xcd; 64],
        });

        let decoded = decode_key(&encode_key(
            &key,
            EncodeOptions {
                minimal: true,
                ..EncodeOptions::default()
            },
        ))
        .unwrap();
        let certs = decoded.userids()[0].certifications();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].signer(), key.key_id());
    }

    #[test]
    fn unknown_packet_tags_are_skipped() {
        let key = test_key();
        let mut encoded = encode_key(&key, EncodeOptions::default());
        // append a marker packet (tag 10) with a short body
        encoded.extend([(10 << 2) | 0b1000_0001, 0, 3]);
        encoded.extend(b"PGP");
        let decoded = decode_keys(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let key = test_key();
        let encoded = encode_key(&key, EncodeOptions::default());
        let result = decode_keys(&encoded[..encoded.len() - 3]);
        assert!(matches!(
            result,
            Err(PacketError::Truncated) | Err(PacketError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn stream_must_start_with_key_packet() {
        let mut data = Vec::new();
        crate::packet::write_packet(&mut data, TAG_USER_ID, |packet| {
            packet.extend(b"Alice <alice@example.com>")
        });
        assert_eq!(decode_keys(&data), Err(PacketError::MissingKeyPacket));
    }

    #[test]
    fn new_format_headers_are_understood() {
        let mut data = Vec::new();
        data.push(0b1100_0000 | TAG_USER_ID);
        data.push(5);
        data.extend(b"hello");
        let mut reader = PacketReader::new(&data);
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.tag, TAG_USER_ID);
        assert_eq!(packet.body, b"hello");
        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn trust_subpackets_round_trip() {
        let mut key = test_key();
        key.userids[0].certifications.push(Certification {
            signer: KeyId::from([5u8; 8]),
            class: CertClass::Generic,
            created_at: parse_timestamp(1_700_000_060).unwrap(),
            expires_at: Some(parse_timestamp(1_700_900_060).unwrap()),
            exportable: true,
            revoked: false,
            trust_depth: 2,
            trust_value: 120,
            trust_scope: Some("@example\\.com>$".to_owned()),
            primary_uid: false,
            notations: vec![Notation {
                name: "source".to_owned(),
                value: "keysigning-party".to_owned(),
                human_readable: true,
            }],
            sig_bytes: vec![0x77; 64],
        });

        let decoded = decode_key(&encode_key(&key, EncodeOptions::default())).unwrap();
        let cert = &decoded.userids()[0].certifications()[1];
        assert_eq!(cert.trust_delegation(), (2, 120));
        assert_eq!(cert.trust_scope(), Some("@example\\.com>$"));
        assert_eq!(
            cert.expires_at().map(|at| at.as_second()),
            Some(1_700_900_060)
        );
        assert_eq!(cert.notations().len(), 1);
        assert!(cert.notations()[0].human_readable);
    }
}
