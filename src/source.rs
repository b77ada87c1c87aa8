//! Deduplication of the initial source file set.
//!
//! Several descriptors may claim the same working-folder key: the same physical file listed
//! twice, or two physical files mapped onto one output location. Exactly one descriptor
//! survives per key:
//!
//! - the higher [`DeclaredType`] wins,
//! - on a tie the descriptor registered first wins,
//! - every dropped descriptor produces one [`RegistryWarning`] (also logged).
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::paths::{normalize_key, os_path_to_string};

/// How authoritative a source file is. Later variants outrank earlier ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DeclaredType {
    #[default]
    Resource = 0,
    Article = 1,
    Override = 2,
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclaredType::Resource => "Resource",
            DeclaredType::Article => "Article",
            DeclaredType::Override => "Override",
        };
        write!(f, "{name}")
    }
}

/// A source file as produced by source enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Directory the file was enumerated from.
    pub base_dir: PathBuf,
    /// Path of the file relative to `base_dir`.
    pub file: PathBuf,
    pub declared_type: DeclaredType,
    /// Optional mapping of `source_dir` (relative to `base_dir`) onto `destination_dir` in the
    /// working folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_dir: Option<PathBuf>,
}

impl FileDescriptor {
    pub fn new<B: Into<PathBuf>, F: Into<PathBuf>>(
        base_dir: B,
        file: F,
        declared_type: DeclaredType,
    ) -> Self {
        FileDescriptor {
            base_dir: base_dir.into(),
            file: file.into(),
            declared_type,
            source_dir: None,
            destination_dir: None,
        }
    }

    pub fn with_mapping<S: Into<PathBuf>, D: Into<PathBuf>>(mut self, source: S, dest: D) -> Self {
        self.source_dir = Some(source.into());
        self.destination_dir = Some(dest.into());
        self
    }

    /// The working-folder key this file is published under.
    pub fn key(&self) -> String {
        let mapped = match (&self.source_dir, &self.destination_dir) {
            (Some(source), Some(dest)) => match self.file.strip_prefix(source) {
                Ok(rest) => dest.join(rest),
                Err(_) => self.file.clone(),
            },
            (None, Some(dest)) => dest.join(&self.file),
            _ => self.file.clone(),
        };
        normalize_key(&os_path_to_string(mapped))
    }

    /// The physical location, as a comparable pair.
    fn physical(&self) -> (&Path, String) {
        (
            self.base_dir.as_path(),
            normalize_key(&os_path_to_string(&self.file)),
        )
    }

    pub fn full_path(&self) -> PathBuf {
        self.base_dir.join(&self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWarning {
    /// The same physical file was listed more than once.
    Duplicate {
        key: String,
        kept: FileDescriptor,
        dropped: FileDescriptor,
    },
    /// Different physical files claim the same working-folder key.
    Conflict {
        key: String,
        kept: FileDescriptor,
        dropped: FileDescriptor,
    },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryWarning::Duplicate { key, kept, dropped } => write!(
                f,
                "Duplicate source file {:?} for key '{}': keeping it as {}, dropping it as {}",
                kept.full_path(),
                key,
                kept.declared_type,
                dropped.declared_type
            ),
            RegistryWarning::Conflict { key, kept, dropped } => write!(
                f,
                "Conflicting source files for key '{}': keeping {:?} ({}), dropping {:?} ({})",
                key,
                kept.full_path(),
                kept.declared_type,
                dropped.full_path(),
                dropped.declared_type
            ),
        }
    }
}

/// The canonical working-folder key to descriptor mapping. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    files: BTreeMap<String, FileDescriptor>,
    warnings: Vec<RegistryWarning>,
}

impl SourceRegistry {
    #[tracing::instrument(skip_all)]
    pub fn register<I: IntoIterator<Item = FileDescriptor>>(descriptors: I) -> SourceRegistry {
        let mut files: BTreeMap<String, FileDescriptor> = BTreeMap::new();
        let mut warnings = Vec::new();
        for descriptor in descriptors {
            let key = descriptor.key();
            let Some(existing) = files.get(&key) else {
                files.insert(key, descriptor);
                continue;
            };
            let same_file = existing.physical() == descriptor.physical();
            // Ties go to the first registration.
            let replace = descriptor.declared_type > existing.declared_type;
            let (kept, dropped) = if replace {
                (descriptor, existing.clone())
            } else {
                (existing.clone(), descriptor)
            };
            let warning = if same_file {
                RegistryWarning::Duplicate {
                    key: key.clone(),
                    kept: kept.clone(),
                    dropped,
                }
            } else {
                RegistryWarning::Conflict {
                    key: key.clone(),
                    kept: kept.clone(),
                    dropped,
                }
            };
            tracing::warn!("{}", warning);
            warnings.push(warning);
            files.insert(key, kept);
        }
        tracing::debug!(
            "Registered {} source files ({} dropped)",
            files.len(),
            warnings.len()
        );
        SourceRegistry { files, warnings }
    }

    pub fn get(&self, key: &str) -> Option<&FileDescriptor> {
        self.files.get(&normalize_key(key))
    }

    pub fn files(&self) -> &BTreeMap<String, FileDescriptor> {
        &self.files
    }

    pub fn warnings(&self) -> &[RegistryWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
