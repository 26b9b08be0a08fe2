//! Bytecode container and loader
//!
//! A bytecode bundle is a fixed-size header followed by an engine-specific
//! payload. Only the header is interpreted here:
//!
//! ```text
//! offset  size  field            encoding
//! 0       4     magic "JSBC"     big-endian (readable in hex dumps)
//! 4       4     format version   little-endian
//! 8       4     flags            little-endian
//! 12      4     payload length   little-endian
//! 16      32    payload SHA-256
//! 48      ..    payload
//! ```
//!
//! Anything that is not a well-formed container for the engine's format
//! version is treated as UTF-8 source text. A mismatch alone never fails a load.
//!
//! Engines do not validate their own images, so the digest is checked here
//! and a payload that fails it never reaches `evaluate_bytecode`.

pub mod source;


pub use source::ScriptSource;

use std::fmt;
use std::io::{self, Write};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::engine::ScriptContext;
use crate::errors::ScriptError;

/// 0x4A534243 = 'J' 'S' 'B' 'C'
pub const MAGIC: u32 = 0x4A53_4243;
/// Header size in bytes
pub const HEADER_LEN: usize = 48;
/// SHA-256 digest size
pub const DIGEST_LEN: usize = 32;
/// Payload is a module image
pub const FLAG_MODULE: u32 = 0x0000_0001;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Whether `bytes` start with the container magic.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == MAGIC.to_be_bytes()
}

/// Container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub payload_len: u32,
    pub digest: [u8; DIGEST_LEN],
}

/// SHA-256 of a bytecode payload.
pub fn payload_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Outcome of reading a header from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRead {
    /// No magic at the start
    Absent,
    /// Magic present but fewer than `HEADER_LEN` bytes
    Truncated,
    /// Complete header
    Present(BytecodeHeader),
}

impl BytecodeHeader {
    pub fn new(
        version: u32,
        payload_len: u32,
        digest: [u8; DIGEST_LEN],
    ) -> Self {
        Self {
            magic: MAGIC,
            version,
            flags: FLAG_MODULE,
            payload_len,
            digest,
        }
    }

    /// Header describing `payload`.
    pub fn for_payload(
        version: u32,
        payload: &[u8],
    ) -> io::Result<Self> {
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bytecode payload too large: {} bytes", payload.len()),
            )
        })?;
        Ok(Self::new(version, payload_len, payload_digest(payload)))
    }

    /// Whether `payload` hashes to the recorded digest.
    pub fn verifies(
        &self,
        payload: &[u8],
    ) -> bool {
        payload_digest(payload) == self.digest
    }

    pub fn read(bytes: &[u8]) -> HeaderRead {
        if !has_magic(bytes) {
            return HeaderRead::Absent;
        }
        if bytes.len() < HEADER_LEN {
            return HeaderRead::Truncated;
        }
        let word = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[16..HEADER_LEN]);
        HeaderRead::Present(Self {
            magic: MAGIC,
            version: word(4),
            flags: word(8),
            payload_len: word(12),
            digest,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..HEADER_LEN].copy_from_slice(&self.digest);
        out
    }

    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
    ) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }
}

/// Wrap an engine payload in a container for `version`.
pub fn encode_container(
    version: u32,
    payload: &[u8],
) -> io::Result<Vec<u8>> {
    let header = BytecodeHeader::for_payload(version, payload)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    header.write_to(&mut out)?;
    out.extend_from_slice(payload);
    Ok(out)
}

/// Why a buffer was run as source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Bytecode loading is switched off
    Disabled,
    /// No container magic
    NoMagic,
    /// Magic present, header cut short
    Truncated,
    /// Container built for another format version
    VersionMismatch { found: u32, expected: u32 },
    /// Declared payload length disagrees with the buffer
    LengthMismatch { declared: u32, actual: usize },
    /// Payload does not match the header digest
    Corrupt,
    /// The engine refused the payload
    Rejected,
}

impl fmt::Display for FallbackReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "bytecode disabled"),
            FallbackReason::NoMagic => write!(f, "no bytecode magic"),
            FallbackReason::Truncated => write!(f, "truncated bytecode header"),
            FallbackReason::VersionMismatch { found, expected } => write!(
                f,
                "bytecode version {:#010x} does not match engine version {:#010x}",
                found, expected
            ),
            FallbackReason::LengthMismatch { declared, actual } => write!(
                f,
                "bytecode payload length {} does not match {} available bytes",
                declared, actual
            ),
            FallbackReason::Corrupt => write!(f, "bytecode payload checksum mismatch"),
            FallbackReason::Rejected => write!(f, "engine rejected bytecode payload"),
        }
    }
}

/// What the loader intends to do with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPlan<'a> {
    Bytecode {
        header: BytecodeHeader,
        payload: &'a [u8],
    },
    Source(FallbackReason),
}

/// How a script was actually loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedScript {
    Bytecode { format_version: u32 },
    Source { fallback: FallbackReason },
}

impl LoadedScript {
    pub fn is_bytecode(&self) -> bool {
        matches!(self, LoadedScript::Bytecode { .. })
    }
}

impl fmt::Display for LoadedScript {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LoadedScript::Bytecode { format_version } => {
                write!(f, "bytecode (format {:#010x})", format_version)
            }
            LoadedScript::Source { fallback } => write!(f, "source ({})", fallback),
        }
    }
}

/// Chooses between the bytecode and source paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeLoader {
    format_version: u32,
    try_bytecode: bool,
}

impl BytecodeLoader {
    pub fn new(
        format_version: u32,
        try_bytecode: bool,
    ) -> Self {
        Self {
            format_version,
            try_bytecode,
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn try_bytecode(&self) -> bool {
        self.try_bytecode
    }

    /// Decide the load path from the header alone.
    pub fn plan<'a>(
        &self,
        bytes: &'a [u8],
    ) -> LoadPlan<'a> {
        if !self.try_bytecode {
            return LoadPlan::Source(FallbackReason::Disabled);
        }
        let header = match BytecodeHeader::read(bytes) {
            HeaderRead::Absent => return LoadPlan::Source(FallbackReason::NoMagic),
            HeaderRead::Truncated => return LoadPlan::Source(FallbackReason::Truncated),
            HeaderRead::Present(header) => header,
        };
        if header.version != self.format_version {
            return LoadPlan::Source(FallbackReason::VersionMismatch {
                found: header.version,
                expected: self.format_version,
            });
        }
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != header.payload_len as usize {
            return LoadPlan::Source(FallbackReason::LengthMismatch {
                declared: header.payload_len,
                actual: payload.len(),
            });
        }
        if !header.verifies(payload) {
            warn!("bytecode payload fails its checksum, loading as source");
            return LoadPlan::Source(FallbackReason::Corrupt);
        }
        LoadPlan::Bytecode { header, payload }
    }

    /// Load `source` into `context`, preferring bytecode when allowed.
    pub fn load(
        &self,
        context: &mut dyn ScriptContext,
        source: &ScriptSource,
    ) -> Result<LoadedScript, ScriptError> {
        let url = source.url();
        let mut bytecode_error = None;

        let fallback = match self.plan(source.bytes()) {
            LoadPlan::Bytecode { header, payload } => {
                match context.evaluate_bytecode(payload, url) {
                    Ok(()) => {
                        debug!(url, version = header.version, "loaded bytecode");
                        return Ok(LoadedScript::Bytecode {
                            format_version: header.version,
                        });
                    }
                    Err(err) => {
                        warn!(url, error = %err, "bytecode rejected, falling back to source");
                        bytecode_error = Some(err);
                        FallbackReason::Rejected
                    }
                }
            }
            LoadPlan::Source(reason) => reason,
        };

        debug!(url, reason = %fallback, "loading as source");
        let result = decode_source(source.bytes())
            .map_err(|message| ScriptError::new(message).with_source_url(url))
            .and_then(|text| context.evaluate(text, url));

        match (result, bytecode_error) {
            (Ok(_), _) => Ok(LoadedScript::Source { fallback }),
            (Err(mut err), Some(bytecode_err)) => {
                err.message = format!(
                    "{} (bytecode load also failed: {})",
                    err.message, bytecode_err.message
                );
                Err(err)
            }
            (Err(err), None) => Err(err),
        }
    }
}

/// Decode UTF-8 source text, skipping a byte-order mark.
fn decode_source(bytes: &[u8]) -> Result<&str, String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|e| {
        format!(
            "Script is neither loadable bytecode nor valid UTF-8 source (invalid byte at offset {})",
            e.valid_up_to()
        )
    })
}
