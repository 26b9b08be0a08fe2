//! Script sources

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::has_magic;

/// Immutable script bytes plus the locator they came from.
///
/// Whether the bytes are bytecode or source text is decided by content, not
/// by the locator.
#[derive(Clone)]
pub struct ScriptSource {
    bytes: Arc<[u8]>,
    url: String,
}

impl ScriptSource {
    pub fn new(
        bytes: impl Into<Arc<[u8]>>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            url: url.into(),
        }
    }

    /// Source text
    pub fn from_text(
        text: &str,
        url: impl Into<String>,
    ) -> Self {
        Self::new(text.as_bytes(), url)
    }

    /// Read a bundle from disk; the locator becomes a `file://` URL.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(Self::new(bytes, format!("file://{}", absolute.display())))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the bytes start with the bytecode container magic.
    pub fn looks_like_bytecode(&self) -> bool {
        has_magic(&self.bytes)
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScriptSource")
            .field("url", &self.url)
            .field("len", &self.bytes.len())
            .field("bytecode", &self.looks_like_bytecode())
            .finish()
    }
}
