//! Just enough OpenPGP to name the keys in a blob.
//!
//! Walks the packet stream, computes fingerprints of primary keys and
//! subkeys, and collects user IDs. Signatures and key material are not
//! interpreted.

use std::fmt::Debug;

use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256};

const TAG_PUBLIC_KEY: u8 = 6;
const TAG_USER_ID: u8 = 13;
const TAG_PUBLIC_SUBKEY: u8 = 14;

const ARMOR_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const ARMOR_END: &str = "-----END PGP PUBLIC KEY BLOCK-----";

/// Attributes of one primary key found in a key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyData {
    /// Uppercase hex fingerprint: 40 characters for v4, 64 for v5 and v6.
    pub fingerprint: String,
    /// Key packet version.
    pub version: u8,
    /// Public-key algorithm id.
    pub algorithm: u8,
    /// Creation time, seconds since the unix epoch.
    pub created: u32,
    /// User IDs bound to this key, in packet order.
    pub user_ids: Vec<String>,
    /// Fingerprints of the subkeys, in packet order.
    pub subkeys: Vec<String>,
}

impl KeyData {
    /// Human readable name of [`Self::algorithm`].
    pub fn algorithm_name(&self) -> &'static str {
        match self.algorithm {
            1..=3 => "RSA",
            16 => "Elgamal",
            17 => "DSA",
            18 => "ECDH",
            19 => "ECDSA",
            22 => "EdDSA",
            25 => "X25519",
            26 => "X448",
            27 => "Ed25519",
            28 => "Ed448",
            _ => "unknown",
        }
    }
}

/// Why a blob could not be read as OpenPGP keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyDataError {
    #[error("key data is empty")]
    Empty,

    #[error("invalid packet header at offset {offset}")]
    InvalidHeader { offset: usize },

    #[error("partial body lengths are not allowed in key packets (offset {offset})")]
    PartialLength { offset: usize },

    #[error("packet at offset {offset} is truncated")]
    Truncated { offset: usize },

    #[error("key packet version {0} is not supported")]
    UnsupportedVersion(u8),

    #[error("key packet of {0} bytes is too long for its version")]
    TooLong(usize),

    #[error("ASCII armor is malformed: {0}")]
    Armor(String),

    #[error("ASCII armor checksum mismatch")]
    Checksum,

    #[error("no public key packet found")]
    NoKeys,
}

/// Turns raw bytes into key records.
pub trait KeyDataParser: Debug + Send + Sync {
    /// Parse `data` into one record per primary key, in order.
    fn parse(&self, data: &[u8]) -> Result<Vec<KeyData>, KeyDataError>;
}

/// [`KeyDataParser`] for binary or ASCII armored OpenPGP public keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPgpParser;

impl KeyDataParser for OpenPgpParser {
    fn parse(&self, data: &[u8]) -> Result<Vec<KeyData>, KeyDataError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(KeyDataError::Empty);
        }

        let trimmed = data.trim_ascii_start();
        if trimmed.starts_with(ARMOR_BEGIN.as_bytes()) {
            let binary = dearmor(trimmed)?;
            parse_packets(&binary)
        } else {
            parse_packets(data)
        }
    }
}

struct Packet<'a> {
    tag: u8,
    body: &'a [u8],
}

fn parse_packets(data: &[u8]) -> Result<Vec<KeyData>, KeyDataError> {
    let mut keys: Vec<KeyData> = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let (packet, next) = read_packet(data, offset)?;
        offset = next;

        match packet.tag {
            TAG_PUBLIC_KEY => keys.push(read_key(packet.body)?),
            TAG_PUBLIC_SUBKEY => {
                let subkey = read_key(packet.body)?;
                if let Some(key) = keys.last_mut() {
                    key.subkeys.push(subkey.fingerprint);
                }
            }
            TAG_USER_ID => {
                if let Some(key) = keys.last_mut() {
                    key.user_ids
                        .push(String::from_utf8_lossy(packet.body).into_owned());
                }
            }
            _ => {}
        }
    }

    if keys.is_empty() {
        return Err(KeyDataError::NoKeys);
    }
    Ok(keys)
}

/// Reads the packet starting at `offset`. Returns it and the offset after it.
fn read_packet(data: &[u8], offset: usize) -> Result<(Packet<'_>, usize), KeyDataError> {
    let truncated = KeyDataError::Truncated { offset };
    let ctb = data[offset];
    if ctb & 0x80 == 0 {
        return Err(KeyDataError::InvalidHeader { offset });
    }

    let mut pos = offset + 1;
    let (tag, len) = if ctb & 0x40 != 0 {
        // New format.
        let first = *data.get(pos).ok_or(truncated.clone())?;
        pos += 1;
        let len = match first {
            0..=191 => usize::from(first),
            192..=223 => {
                let second = *data.get(pos).ok_or(truncated.clone())?;
                pos += 1;
                ((usize::from(first) - 192) << 8) + usize::from(second) + 192
            }
            255 => {
                let bytes = data.get(pos..pos + 4).ok_or(truncated.clone())?;
                pos += 4;
                be_u32(bytes) as usize
            }
            _ => return Err(KeyDataError::PartialLength { offset }),
        };
        (ctb & 0x3F, len)
    } else {
        // Old format.
        let tag = (ctb >> 2) & 0x0F;
        let len = match ctb & 0x03 {
            0 => {
                let b = *data.get(pos).ok_or(truncated.clone())?;
                pos += 1;
                usize::from(b)
            }
            1 => {
                let bytes = data.get(pos..pos + 2).ok_or(truncated.clone())?;
                pos += 2;
                usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            2 => {
                let bytes = data.get(pos..pos + 4).ok_or(truncated.clone())?;
                pos += 4;
                be_u32(bytes) as usize
            }
            // Indeterminate length, runs to the end of the input.
            _ => data.len() - pos,
        };
        (tag, len)
    };

    let end = pos.checked_add(len).ok_or(truncated.clone())?;
    let body = data.get(pos..end).ok_or(truncated)?;
    Ok((Packet { tag, body }, end))
}

fn read_key(body: &[u8]) -> Result<KeyData, KeyDataError> {
    // version (1) + creation time (4) + algorithm (1)
    if body.len() < 6 {
        return Err(KeyDataError::Truncated { offset: 0 });
    }
    let version = body[0];
    let created = be_u32(&body[1..5]);
    let algorithm = body[5];

    let fingerprint = match version {
        4 => {
            let mut hasher = Sha1::new();
            hasher.update([0x99u8]);
            let Ok(len) = u16::try_from(body.len()) else {
                return Err(KeyDataError::TooLong(body.len()));
            };
            hasher.update(len.to_be_bytes());
            hasher.update(body);
            hex::encode_upper(hasher.finalize())
        }
        5 | 6 => {
            let prefix: u8 = if version == 5 { 0x9A } else { 0x9B };
            let mut hasher = Sha256::new();
            hasher.update([prefix]);
            let Ok(len) = u32::try_from(body.len()) else {
                return Err(KeyDataError::TooLong(body.len()));
            };
            hasher.update(len.to_be_bytes());
            hasher.update(body);
            hex::encode_upper(hasher.finalize())
        }
        other => return Err(KeyDataError::UnsupportedVersion(other)),
    };

    Ok(KeyData {
        fingerprint,
        version,
        algorithm,
        created,
        user_ids: Vec::new(),
        subkeys: Vec::new(),
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Strips ASCII armor and checks the CRC-24 line if there is one.
fn dearmor(data: &[u8]) -> Result<Vec<u8>, KeyDataError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| KeyDataError::Armor(format!("not UTF-8: {e}")))?;

    let mut lines = text.lines().map(str::trim);
    // Begin line, checked by the caller.
    lines.next();

    // Armor headers end at the first blank line. Headers are optional.
    let mut body = String::new();
    let mut checksum = None;
    let mut in_headers = true;
    let mut terminated = false;

    for line in lines {
        if line == ARMOR_END {
            terminated = true;
            break;
        }
        if in_headers {
            if line.is_empty() {
                in_headers = false;
                continue;
            }
            if line.contains(": ") {
                continue;
            }
            in_headers = false;
        }
        if let Some(crc) = line.strip_prefix('=') {
            checksum = Some(crc.to_owned());
        } else {
            body.push_str(line);
        }
    }

    if !terminated {
        return Err(KeyDataError::Armor("missing end line".into()));
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let binary = engine
        .decode(body.as_bytes())
        .map_err(|e| KeyDataError::Armor(e.to_string()))?;

    if let Some(checksum) = checksum {
        let expected = engine
            .decode(checksum.as_bytes())
            .map_err(|e| KeyDataError::Armor(format!("bad checksum line: {e}")))?;
        if expected.len() != 3 || expected != crc24(&binary).to_be_bytes()[1..] {
            return Err(KeyDataError::Checksum);
        }
    }

    Ok(binary)
}

fn crc24(data: &[u8]) -> u32 {
    const INIT: u32 = 0x00B7_04CE;
    const POLY: u32 = 0x0186_4CFB;

    let mut crc = INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}
