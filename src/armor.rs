//! ASCII armor: radix-64 framing with a CRC-24 checksum line.

use base64ct::{Base64, Encoding};
use snafu::{ResultExt, Snafu};

const LINE_WIDTH: usize = 64;

#[derive(Debug, Snafu)]
pub enum ArmorError {
    #[snafu(display("missing armor header line"))]
    MissingHeader,
    #[snafu(display("missing armor footer line"))]
    MissingFooter,
    #[snafu(display("armor header and footer labels disagree"))]
    LabelMismatch,
    #[snafu(display("unknown armor label {label:?}"))]
    UnknownLabel { label: String },
    #[snafu(display("decoding radix-64 data"))]
    Radix64 { source: base64ct::Error },
    #[snafu(display("armor checksum mismatch"))]
    ChecksumMismatch,
}

/// What an armored block contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorKind {
    PublicKey,
    PrivateKey,
    Signature,
    Message,
}

impl ArmorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::PublicKey => "PGP PUBLIC KEY BLOCK",
            Self::PrivateKey => "PGP PRIVATE KEY BLOCK",
            Self::Signature => "PGP SIGNATURE",
            Self::Message => "PGP MESSAGE",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "PGP PUBLIC KEY BLOCK" => Some(Self::PublicKey),
            "PGP PRIVATE KEY BLOCK" => Some(Self::PrivateKey),
            "PGP SIGNATURE" => Some(Self::Signature),
            "PGP MESSAGE" => Some(Self::Message),
            _ => None,
        }
    }
}

/// Quick check whether a byte stream looks armored rather than binary.
pub fn is_armored(data: &[u8]) -> bool {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(_) => return false,
    };
    text.trim_start().starts_with("-----BEGIN ")
}

/// Wrap binary data in an armored block.
pub fn enarmor(kind: ArmorKind, data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 / 3 + 128);
    out.push_str("-----BEGIN ");
    out.push_str(kind.label());
    out.push_str("-----\n\n");

    let encoded = Base64::encode_string(data);
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        // chunks of an ASCII string stay ASCII
        out.push_str(std::str::from_utf8(chunk).expect("radix-64 output is ascii"));
        out.push('\n');
    }

    out.push('=');
    let crc = checksum_crc24(data);
    out.push_str(&Base64::encode_string(&crc.to_be_bytes()[1..4]));
    out.push('\n');

    out.push_str("-----END ");
    out.push_str(kind.label());
    out.push_str("-----\n");
    out
}

/// Strip armor, verify the checksum, and return the payload.
pub fn dearmor(text: &str) -> Result<(ArmorKind, Vec<u8>), ArmorError> {
    let mut lines = text.lines().map(str::trim);

    let header = loop {
        match lines.next() {
            Some("") => continue,
            Some(line) => break line,
            None => return Err(ArmorError::MissingHeader),
        }
    };
    let label = header
        .strip_prefix("-----BEGIN ")
        .and_then(|rest| rest.strip_suffix("-----"))
        .ok_or(ArmorError::MissingHeader)?;
    let kind = ArmorKind::from_label(label).ok_or_else(|| ArmorError::UnknownLabel {
        label: label.to_owned(),
    })?;

    // optional armor headers up to the blank separator line
    let mut payload = String::new();
    let mut checksum: Option<String> = None;
    let mut in_headers = true;
    let mut footer_seen = false;
    for line in lines {
        if in_headers {
            if line.is_empty() {
                in_headers = false;
            } else if !line.contains(": ") {
                // no header block at all, this is already data
                in_headers = false;
                payload.push_str(line);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("-----END ") {
            if rest.strip_suffix("-----") != Some(label) {
                return Err(ArmorError::LabelMismatch);
            }
            footer_seen = true;
            break;
        }
        if let Some(rest) = line.strip_prefix('=') {
            checksum = Some(rest.to_owned());
            continue;
        }
        payload.push_str(line);
    }
    if !footer_seen {
        return Err(ArmorError::MissingFooter);
    }

    let data = Base64::decode_vec(&payload).context(Radix64Snafu)?;

    if let Some(checksum) = checksum {
        let stated = Base64::decode_vec(&checksum).context(Radix64Snafu)?;
        let computed = checksum_crc24(&data);
        if stated != computed.to_be_bytes()[1..4] {
            return Err(ArmorError::ChecksumMismatch);
        }
    }

    Ok((kind, data))
}

// Translation of the checksum function from RFC 4880, section 6.1.
fn checksum_crc24(data: &[u8]) -> u32 {
    const CRC24_INIT: u32 = 0x00b7_04ce;
    const CRC24_POLY: u32 = 0x0186_4cfb;

    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00ff_ffff
}
