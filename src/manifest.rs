//! The durable record of a build: one [`ManifestItem`] per document, listing every output it
//! produced together with the SHA-256 of the bytes written.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use crate::error::BuildError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFileInfo {
    pub relative_path: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    pub document_type: String,
    pub source_relative_path: String,
    /// Keyed by output extension, including the leading dot (`.html`).
    #[serde(default)]
    pub output: BTreeMap<String, OutputFileInfo>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ManifestItem {
    pub fn new<T: Into<String>, S: Into<String>>(document_type: T, source: S) -> Self {
        ManifestItem {
            document_type: document_type.into(),
            source_relative_path: source.into(),
            ..Default::default()
        }
    }

    pub fn record_output(&mut self, extension: &str, relative_path: &str, hash: String) {
        let previous = self.output.insert(
            extension.to_string(),
            OutputFileInfo {
                relative_path: relative_path.to_string(),
                hash,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(
                "Document '{}' produced '{}' output twice; '{}' replaces '{}'",
                self.source_relative_path,
                extension,
                relative_path,
                previous.relative_path
            );
        }
    }
}

/// A problem found by [`Manifest::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyIssue {
    Missing {
        relative_path: String,
    },
    HashMismatch {
        relative_path: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestItem>,
}

impl Manifest {
    pub fn new(mut files: Vec<ManifestItem>) -> Self {
        files.sort_by(|a, b| a.source_relative_path.cmp(&b.source_relative_path));
        Manifest { files }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Manifest, BuildError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BuildError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn find(&self, source_relative_path: &str) -> Option<&ManifestItem> {
        self.files
            .iter()
            .find(|item| item.source_relative_path == source_relative_path)
    }

    /// Re-hash every recorded output under `output_dir`.
    #[tracing::instrument(skip(self))]
    pub fn verify(&self, output_dir: &Path) -> Result<Vec<VerifyIssue>, BuildError> {
        let mut issues = Vec::new();
        for info in self.files.iter().flat_map(|item| item.output.values()) {
            let path = output_dir.join(&info.relative_path);
            let actual = match hash_file(&path) {
                Ok(actual) => actual,
                Err(BuildError::NotFound(_)) => {
                    tracing::warn!("Output '{}' is missing", info.relative_path);
                    issues.push(VerifyIssue::Missing {
                        relative_path: info.relative_path.clone(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            if actual != info.hash {
                tracing::warn!("Output '{}' does not match its hash", info.relative_path);
                issues.push(VerifyIssue::HashMismatch {
                    relative_path: info.relative_path.clone(),
                    expected: info.hash.clone(),
                    actual,
                });
            }
        }
        Ok(issues)
    }
}

/// Writes through to `inner` while hashing exactly the bytes accepted by it.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Flush, then return the inner writer and the hex digest.
    pub fn finish(mut self) -> io::Result<(W, String)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn hash_file(path: &Path) -> Result<String, BuildError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
