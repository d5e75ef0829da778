//! OpenPGP packet codec: canonical encoding of keys and certifications,
//! streaming decode with forward-compatible skipping of unknown packets.

mod decode;

pub use decode::{decode_key, decode_keys, PacketReader, RawPacket};

use crate::certification::Certification;
use crate::key::{Key, KeyId, KeyMaterial, RevocationKey, Subkey};
use crate::types::{KeyAlgorithm, KeyCapabilities};
use jiff::Timestamp;
use snafu::Snafu;

pub(crate) const TAG_SIGNATURE: u8 = 2;
pub(crate) const TAG_SECRET_KEY: u8 = 5;
pub(crate) const TAG_PUBLIC_KEY: u8 = 6;
pub(crate) const TAG_SECRET_SUBKEY: u8 = 7;
pub(crate) const TAG_USER_ID: u8 = 13;
pub(crate) const TAG_PUBLIC_SUBKEY: u8 = 14;

// signature classes
pub(crate) const SIG_SUBKEY_BINDING: u8 = 0x18;
pub(crate) const SIG_DIRECT_KEY: u8 = 0x1f;
pub(crate) const SIG_KEY_REVOCATION: u8 = 0x20;
pub(crate) const SIG_CERT_REVOCATION: u8 = 0x30;

// subpacket types
pub(crate) const SP_CREATION_TIME: u8 = 2;
pub(crate) const SP_SIG_EXPIRATION: u8 = 3;
pub(crate) const SP_EXPORTABLE: u8 = 4;
pub(crate) const SP_TRUST: u8 = 5;
pub(crate) const SP_SCOPE: u8 = 6;
pub(crate) const SP_KEY_EXPIRATION: u8 = 9;
pub(crate) const SP_REVOCATION_KEY: u8 = 12;
pub(crate) const SP_ISSUER: u8 = 16;
pub(crate) const SP_NOTATION: u8 = 20;
pub(crate) const SP_PRIMARY_UID: u8 = 25;
pub(crate) const SP_KEY_FLAGS: u8 = 27;

// curve identifiers, length-prefixed (ed25519, curve25519)
const OID_ED25519: &[u8] = &[0x09, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xda, 0x47, 0x0f, 0x01];
const OID_CV25519: &[u8] = &[0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x97, 0x55, 0x01, 0x05, 0x01];

#[derive(Debug, PartialEq, Snafu)]
pub enum PacketError {
    #[snafu(display("truncated packet stream"))]
    Truncated,
    #[snafu(display("malformed packet: {reason}"))]
    MalformedPacket { reason: &'static str },
    #[snafu(display("indeterminate-length packets are not supported"))]
    UnsupportedPacketLength,
    #[snafu(display("stream does not begin with a key packet"))]
    MissingKeyPacket,
}

/// Controls what [`encode_key`] writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Emit secret key packets where secret material is present.
    pub with_secret: bool,
    /// Strip every certification except self-certifications.
    pub minimal: bool,
    /// Also emit non-exportable certifications (local serialization only).
    pub include_local: bool,
}

/// Write one packet with an old-format header and a two-byte length.
pub(crate) fn write_packet<F: FnOnce(&mut Vec<u8>)>(out: &mut Vec<u8>, tag: u8, write: F) {
    let init = out.len();
    let header_tag = (tag << 2) | 0b1000_0001;
    out.extend([header_tag, 0, 0]);
    write(out);
    let len = out.len() - init - 3;
    assert!(len < u16::MAX as usize);
    out[init + 1..init + 3].copy_from_slice(&(len as u16).to_be_bytes());
}

pub(crate) fn write_subpackets<F: FnOnce(&mut Vec<u8>)>(packet: &mut Vec<u8>, write_each: F) {
    packet.extend([0, 0]);
    let init = packet.len();
    write_each(packet);
    let len = packet.len() - init;
    assert!(len < u16::MAX as usize);
    packet[init - 2..init].copy_from_slice(&(len as u16).to_be_bytes());
}

pub(crate) fn write_single_subpacket<F: FnOnce(&mut Vec<u8>)>(
    packet: &mut Vec<u8>,
    tag: u8,
    write: F,
) {
    packet.extend([0, tag]);
    let init = packet.len() - 1;
    write(packet);
    let len = packet.len() - init;
    assert!(len < 192);
    packet[init - 1] = len as u8;
}

/// Write a multi-precision integer: two-byte bit count, then the magnitude
/// with leading zero octets stripped.
pub(crate) fn write_mpi(out: &mut Vec<u8>, mpi: &[u8]) {
    let mpi = match mpi.iter().position(|&byte| byte != 0) {
        Some(first) => &mpi[first..],
        None => &[],
    };
    let bits = match mpi.first() {
        Some(&first) => mpi.len() * 8 - first.leading_zeros() as usize,
        None => 0,
    };
    assert!(bits < u16::MAX as usize);
    out.extend((bits as u16).to_be_bytes());
    out.extend(mpi);
}

fn unix_seconds(timestamp: Timestamp) -> u32 {
    timestamp.as_second() as u32
}

/// Serialized public key packet body; the fingerprint is derived over this.
pub(crate) fn public_body(
    material: &KeyMaterial,
    algorithm: KeyAlgorithm,
    created_at: Timestamp,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(material.public.len() + 32);
    body.push(4);
    body.extend(unix_seconds(created_at).to_be_bytes());
    body.push(algorithm.id());
    match algorithm {
        KeyAlgorithm::Rsa { .. } => {
            write_mpi(&mut body, &material.public);
            write_mpi(&mut body, &[1, 0, 1]);
        }
        KeyAlgorithm::EdDsa => {
            body.extend(OID_ED25519);
            let mut point = Vec::with_capacity(material.public.len() + 1);
            point.push(0x40);
            point.extend(&material.public);
            write_mpi(&mut body, &point);
        }
        KeyAlgorithm::Ecdh => {
            body.extend(OID_CV25519);
            let mut point = Vec::with_capacity(material.public.len() + 1);
            point.push(0x40);
            point.extend(&material.public);
            write_mpi(&mut body, &point);
            // KDF parameters: SHA-256, AES-128
            body.extend([0x03, 0x01, 0x08, 0x07]);
        }
    }
    body
}

fn rfc_key_flags(capabilities: KeyCapabilities) -> u8 {
    let mut flags = 0u8;
    if capabilities.contains(KeyCapabilities::CERTIFY) {
        flags |= 0x01;
    }
    if capabilities.contains(KeyCapabilities::SIGN) {
        flags |= 0x02;
    }
    if capabilities.contains(KeyCapabilities::ENCRYPT) {
        flags |= 0x0c;
    }
    if capabilities.contains(KeyCapabilities::AUTH) {
        flags |= 0x20;
    }
    flags
}

pub(crate) fn capabilities_from_rfc_flags(flags: u8) -> KeyCapabilities {
    let mut capabilities = KeyCapabilities::empty();
    if flags & 0x01 != 0 {
        capabilities |= KeyCapabilities::CERTIFY;
    }
    if flags & 0x02 != 0 {
        capabilities |= KeyCapabilities::SIGN;
    }
    if flags & 0x0c != 0 {
        capabilities |= KeyCapabilities::ENCRYPT;
    }
    if flags & 0x20 != 0 {
        capabilities |= KeyCapabilities::AUTH;
    }
    capabilities
}

fn write_key_packet(out: &mut Vec<u8>, subkey: &Subkey, primary: bool, with_secret: bool) {
    let secret = with_secret && subkey.has_secret();
    let tag = match (primary, secret) {
        (true, false) => TAG_PUBLIC_KEY,
        (true, true) => TAG_SECRET_KEY,
        (false, false) => TAG_PUBLIC_SUBKEY,
        (false, true) => TAG_SECRET_SUBKEY,
    };
    write_packet(out, tag, |packet| {
        packet.extend(public_body(&subkey.material, subkey.algorithm, subkey.created_at));
        if secret {
            if let Some(ref secret_bytes) = subkey.material.secret {
                packet.push(0); // unprotected
                write_mpi(packet, secret_bytes);
            }
        }
    });
}

fn write_signature_packet<F: FnOnce(&mut Vec<u8>)>(
    out: &mut Vec<u8>,
    class: u8,
    issuer: KeyId,
    hash_left: [u8; 2],
    sig_mpi: &[u8],
    hashed: F,
) {
    write_packet(out, TAG_SIGNATURE, |packet| {
        packet.push(4);
        packet.push(class);
        packet.push(22); // signing algorithm (EdDSA)
        packet.push(8); // hash algorithm (SHA-256)
        write_subpackets(packet, hashed);
        write_subpackets(packet, |unhashed| {
            write_single_subpacket(unhashed, SP_ISSUER, |sp| sp.extend(issuer.as_bytes()));
        });
        packet.extend(hash_left);
        write_mpi(packet, sig_mpi);
    });
}

fn write_certification(out: &mut Vec<u8>, cert: &Certification) {
    let hash_left = [
        cert.sig_bytes.first().copied().unwrap_or(0),
        cert.sig_bytes.get(1).copied().unwrap_or(0),
    ];
    write_signature_packet(
        out,
        cert.class.as_byte(),
        cert.signer,
        hash_left,
        &cert.sig_bytes,
        |hashed| {
            write_single_subpacket(hashed, SP_CREATION_TIME, |sp| {
                sp.extend(unix_seconds(cert.created_at).to_be_bytes())
            });
            if let Some(expires_at) = cert.expires_at {
                let delta = expires_at.as_second() - cert.created_at.as_second();
                write_single_subpacket(hashed, SP_SIG_EXPIRATION, |sp| {
                    sp.extend((delta as u32).to_be_bytes())
                });
            }
            if !cert.exportable {
                write_single_subpacket(hashed, SP_EXPORTABLE, |sp| sp.push(0));
            }
            if cert.trust_depth > 0 || cert.trust_value > 0 {
                write_single_subpacket(hashed, SP_TRUST, |sp| {
                    sp.extend([cert.trust_depth, cert.trust_value])
                });
            }
            if let Some(ref scope) = cert.trust_scope {
                write_single_subpacket(hashed, SP_SCOPE, |sp| {
                    sp.extend(scope.as_bytes());
                    sp.push(0);
                });
            }
            if cert.primary_uid {
                write_single_subpacket(hashed, SP_PRIMARY_UID, |sp| sp.push(1));
            }
            for notation in &cert.notations {
                write_single_subpacket(hashed, SP_NOTATION, |sp| {
                    sp.extend([if notation.human_readable { 0x80 } else { 0 }, 0, 0, 0]);
                    sp.extend((notation.name.len() as u16).to_be_bytes());
                    sp.extend((notation.value.len() as u16).to_be_bytes());
                    sp.extend(notation.name.as_bytes());
                    sp.extend(notation.value.as_bytes());
                });
            }
        },
    );
}

fn write_revocation(out: &mut Vec<u8>, class: u8, issuer: KeyId, created_at: Timestamp) {
    write_signature_packet(out, class, issuer, [0, 0], &[1], |hashed| {
        write_single_subpacket(hashed, SP_CREATION_TIME, |sp| {
            sp.extend(unix_seconds(created_at).to_be_bytes())
        });
    });
}

fn write_direct_key_sig(out: &mut Vec<u8>, key: &Key) {
    let primary = key.primary_subkey();
    write_signature_packet(out, SIG_DIRECT_KEY, key.key_id(), [0, 0], &[1], |hashed| {
        write_single_subpacket(hashed, SP_CREATION_TIME, |sp| {
            sp.extend(unix_seconds(primary.created_at).to_be_bytes())
        });
        write_single_subpacket(hashed, SP_KEY_FLAGS, |sp| {
            sp.push(rfc_key_flags(primary.capabilities))
        });
        if let Some(expires_at) = primary.expires_at {
            let delta = expires_at.as_second() - primary.created_at.as_second();
            write_single_subpacket(hashed, SP_KEY_EXPIRATION, |sp| {
                sp.extend((delta as u32).to_be_bytes())
            });
        }
        for revoker in key.revocation_keys() {
            write_single_subpacket(hashed, SP_REVOCATION_KEY, |sp| {
                sp.push(0x80 | if revoker.sensitive { 0x40 } else { 0 });
                sp.push(revoker.algorithm_id);
                sp.extend(revoker.fingerprint.as_bytes());
            });
        }
    });
}

fn write_subkey_binding(out: &mut Vec<u8>, key: &Key, subkey: &Subkey) {
    write_signature_packet(out, SIG_SUBKEY_BINDING, key.key_id(), [0, 0], &[1], |hashed| {
        write_single_subpacket(hashed, SP_CREATION_TIME, |sp| {
            sp.extend(unix_seconds(subkey.created_at).to_be_bytes())
        });
        write_single_subpacket(hashed, SP_KEY_FLAGS, |sp| {
            sp.push(rfc_key_flags(subkey.capabilities))
        });
        if let Some(expires_at) = subkey.expires_at {
            let delta = expires_at.as_second() - subkey.created_at.as_second();
            write_single_subpacket(hashed, SP_KEY_EXPIRATION, |sp| {
                sp.extend((delta as u32).to_be_bytes())
            });
        }
    });
}

/// Serialize a key into its canonical packet sequence: primary key packet,
/// direct-key metadata, user ids (primary first) each followed by their
/// certifications, then remaining subkeys with binding metadata.
pub fn encode_key(key: &Key, options: EncodeOptions) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    let self_id = key.key_id();

    write_key_packet(&mut out, key.primary_subkey(), true, options.with_secret);
    write_direct_key_sig(&mut out, key);
    if key.is_revoked() {
        write_revocation(
            &mut out,
            SIG_KEY_REVOCATION,
            self_id,
            key.primary_subkey().created_at,
        );
    }

    let mut uids: Vec<&crate::userid::UserId> = key.userids().iter().collect();
    uids.sort_by_key(|uid| !uid.is_primary());
    for uid in uids {
        write_packet(&mut out, TAG_USER_ID, |packet| {
            packet.extend(uid.raw().as_bytes())
        });
        if uid.is_revoked() {
            write_revocation(
                &mut out,
                SIG_CERT_REVOCATION,
                self_id,
                key.primary_subkey().created_at,
            );
        }
        for cert in uid.certifications() {
            if !cert.exportable && !options.include_local {
                continue;
            }
            if options.minimal && cert.signer != self_id {
                continue;
            }
            write_certification(&mut out, cert);
            if cert.is_revoked() {
                write_revocation(&mut out, SIG_CERT_REVOCATION, cert.signer, cert.created_at);
            }
        }
    }

    for subkey in &key.subkeys()[1..] {
        write_key_packet(&mut out, subkey, false, options.with_secret);
        write_subkey_binding(&mut out, key, subkey);
    }

    out
}

/// The octets a certification over `uid_raw` signs: the 0x99-framed key
/// packet body followed by the 0xb4-framed user id, per RFC 4880 5.2.4.
pub(crate) fn certification_payload(primary: &Subkey, uid_raw: &str) -> Vec<u8> {
    let body = public_body(&primary.material, primary.algorithm, primary.created_at);
    let mut data = Vec::with_capacity(body.len() + uid_raw.len() + 8);
    data.push(0x99);
    data.extend((body.len() as u16).to_be_bytes());
    data.extend(&body);
    data.push(0xb4);
    data.extend((uid_raw.len() as u32).to_be_bytes());
    data.extend(uid_raw.as_bytes());
    data
}

pub(crate) fn revocation_key_from_subpacket(data: &[u8]) -> Option<RevocationKey> {
    if data.len() != 22 {
        return None;
    }
    let mut fingerprint = [0u8; 20];
    fingerprint.copy_from_slice(&data[2..]);
    Some(RevocationKey {
        algorithm_id: data[1],
        fingerprint: fingerprint.into(),
        sensitive: data[0] & 0x40 != 0,
    })
}
