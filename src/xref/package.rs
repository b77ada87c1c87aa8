//! External reference packages: pre-built uid lookups for symbols this build does not produce.
//!
//! Callers only see [`PackageIndex`]. A [`PackageSource`] hands out indices on demand, which
//! may be a freshly opened set of package files ([`PackageSet`]) or a shared pre-built
//! [`PackageSnapshot`]. An index is released when it is dropped, so scoping the handle to a
//! block (or using [`with_index`]) releases it on every exit path, unwinding included.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{error::BuildError, xref::spec::XRefSpec};

/// A raw reference record as stored inside a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecord {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_with_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_external: bool,
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

impl ReferenceRecord {
    /// Normalize into an [`XRefSpec`] through the generic content model, so the result obeys
    /// the same shape as any spec read from a catalog.
    pub fn to_spec(&self) -> Result<XRefSpec, BuildError> {
        let model = serde_json::to_value(self)?;
        Ok(serde_json::from_value(model)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(default)]
    pub references: Vec<ReferenceRecord>,
}

impl PackageDocument {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, BuildError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&text)?)
    }

    fn into_index(self) -> BTreeMap<String, ReferenceRecord> {
        let mut index = BTreeMap::new();
        for record in self.references {
            // First record for a uid wins inside one package.
            index.entry(record.uid.clone()).or_insert(record);
        }
        index
    }
}

pub trait PackageIndex {
    fn lookup(&self, uid: &str) -> Option<ReferenceRecord>;
}

pub trait PackageSource: Send + Sync {
    /// Acquire an index over the configured packages. Drop it to release.
    fn open(&self) -> Result<Box<dyn PackageIndex + '_>, BuildError>;
}

/// Run `f` against a freshly acquired index, releasing it before returning.
pub fn with_index<R, F>(source: &dyn PackageSource, f: F) -> Result<R, BuildError>
where
    F: FnOnce(&dyn PackageIndex) -> R,
{
    let index = source.open()?;
    Ok(f(index.as_ref()))
}

/// The configured package files. Every [`PackageSource::open`] reads them anew.
#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    locations: Vec<PathBuf>,
}

impl PackageSet {
    pub fn new(locations: Vec<PathBuf>) -> Self {
        PackageSet { locations }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Read every package once into a shareable snapshot.
    pub fn snapshot(&self) -> Result<PackageSnapshot, BuildError> {
        let open = self.open_packages()?;
        let mut records = BTreeMap::new();
        for (_, index) in open.packages.iter() {
            for (uid, record) in index.iter() {
                records.entry(uid.clone()).or_insert_with(|| record.clone());
            }
        }
        Ok(PackageSnapshot { records })
    }

    fn open_packages(&self) -> Result<OpenPackages, BuildError> {
        let mut packages = Vec::with_capacity(self.locations.len());
        for location in self.locations.iter() {
            match PackageDocument::read(location) {
                Ok(doc) => packages.push((location.clone(), doc.into_index())),
                Err(e) => {
                    tracing::warn!("Package {:?} could not be opened and is skipped: {}", location, e)
                }
            }
        }
        tracing::debug!("Opened {} of {} packages", packages.len(), self.locations.len());
        Ok(OpenPackages { packages })
    }
}

impl PackageSource for PackageSet {
    fn open(&self) -> Result<Box<dyn PackageIndex + '_>, BuildError> {
        Ok(Box::new(self.open_packages()?))
    }
}

/// Packages held open for the lifetime of one acquisition, queried in configured order.
struct OpenPackages {
    packages: Vec<(PathBuf, BTreeMap<String, ReferenceRecord>)>,
}

impl PackageIndex for OpenPackages {
    fn lookup(&self, uid: &str) -> Option<ReferenceRecord> {
        self.packages
            .iter()
            .find_map(|(_, index)| index.get(uid).cloned())
    }
}

impl Drop for OpenPackages {
    fn drop(&mut self) {
        tracing::trace!("Released {} packages", self.packages.len());
    }
}

/// A pre-built, immutable package index. Opening it only clones a handle.
#[derive(Debug, Clone, Default)]
pub struct PackageSnapshot {
    records: BTreeMap<String, ReferenceRecord>,
}

impl PackageSnapshot {
    pub fn from_records<I: IntoIterator<Item = ReferenceRecord>>(records: I) -> Self {
        PackageSnapshot {
            records: PackageDocument {
                references: records.into_iter().collect(),
            }
            .into_index(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PackageIndex for PackageSnapshot {
    fn lookup(&self, uid: &str) -> Option<ReferenceRecord> {
        self.records.get(uid).cloned()
    }
}

impl PackageSource for PackageSnapshot {
    fn open(&self) -> Result<Box<dyn PackageIndex + '_>, BuildError> {
        Ok(Box::new(SnapshotHandle(self)))
    }
}

impl PackageSource for Arc<PackageSnapshot> {
    fn open(&self) -> Result<Box<dyn PackageIndex + '_>, BuildError> {
        Ok(Box::new(SnapshotHandle(self.as_ref())))
    }
}

struct SnapshotHandle<'a>(&'a PackageSnapshot);

impl PackageIndex for SnapshotHandle<'_> {
    fn lookup(&self, uid: &str) -> Option<ReferenceRecord> {
        self.0.lookup(uid)
    }
}
