//! The resolution authority for uids.
//!
//! Lookups fall through a fixed order, each step terminal on its first match:
//!
//! 1. internal specs registered by content processing (always win),
//! 2. the external cache of previously resolved specs,
//! 3. the known-unresolved set (fail fast, no I/O),
//! 4. remote/local catalogs in configured order,
//! 5. reference packages,
//! 6. otherwise the uid is recorded as unknown for the rest of the build.
//!
//! The internal map is filled before the transformation phase and only read afterwards. The
//! external cache and the unknown set are shared by every transformation worker; updates go
//! through per-uid gates so that concurrent lookups of one uid query external sources at most
//! once, and every upsert merges instead of overwriting.
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    error::BuildError,
    paths::is_absolute_url,
    xref::{
        catalog::XRefCatalog,
        package::{with_index, PackageSource},
        spec::XRefSpec,
    },
};

/// Where a uid currently stands. At most one state holds per uid.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    Internal(XRefSpec),
    ExternalResolved(XRefSpec),
    Unknown,
}

#[derive(Debug, Default)]
struct ResolverStats {
    catalog_queries: AtomicUsize,
    package_opens: AtomicUsize,
    package_queries: AtomicUsize,
    external_hits: AtomicUsize,
    unknown_hits: AtomicUsize,
}

/// Point-in-time copy of the resolver's query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStatsSnapshot {
    pub catalog_queries: usize,
    pub package_opens: usize,
    pub package_queries: usize,
    pub external_hits: usize,
    pub unknown_hits: usize,
}

impl fmt::Display for ResolverStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "catalog queries: {}, package opens: {}, package queries: {}, cache hits: {}, \
             unknown hits: {}",
            self.catalog_queries,
            self.package_opens,
            self.package_queries,
            self.external_hits,
            self.unknown_hits
        )
    }
}

/// Outcome of [`XRefResolver::resolve_outstanding`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutstandingReport {
    pub from_catalogs: usize,
    pub from_packages: usize,
    /// Uids recorded as unknown by this pass.
    pub unknown: Vec<String>,
    /// Externally reported uids that still lack an href after the pass.
    pub incomplete: Vec<String>,
}

pub struct XRefResolver {
    internal: RwLock<BTreeMap<String, XRefSpec>>,
    referenced: DashSet<String>,
    external: DashMap<String, XRefSpec>,
    unknown: DashSet<String>,
    gates: DashMap<String, Arc<Mutex<()>>>,
    catalogs: Vec<XRefCatalog>,
    packages: Option<Arc<dyn PackageSource>>,
    sealed: AtomicBool,
    stats: ResolverStats,
}

impl Default for XRefResolver {
    fn default() -> Self {
        XRefResolver::new(Vec::new(), None)
    }
}

impl fmt::Debug for XRefResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XRefResolver")
            .field("internal", &self.internal.read().len())
            .field("external", &self.external.len())
            .field("unknown", &self.unknown.len())
            .field("catalogs", &self.catalogs.len())
            .field("packages", &self.packages.is_some())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl XRefResolver {
    pub fn new(catalogs: Vec<XRefCatalog>, packages: Option<Arc<dyn PackageSource>>) -> Self {
        XRefResolver {
            internal: RwLock::new(BTreeMap::new()),
            referenced: DashSet::new(),
            external: DashMap::new(),
            unknown: DashSet::new(),
            gates: DashMap::new(),
            catalogs,
            packages,
            sealed: AtomicBool::new(false),
            stats: ResolverStats::default(),
        }
    }

    pub fn catalogs(&self) -> &[XRefCatalog] {
        &self.catalogs
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Register a spec produced by this build. The href must be a non-empty, relative
    /// working-folder path. The first registration of a uid wins.
    pub fn register_internal(&self, spec: XRefSpec) -> Result<(), BuildError> {
        if spec.uid.is_empty() {
            return Err(BuildError::InvalidXref(
                "internal xref spec has an empty uid".to_string(),
            ));
        }
        let Some(href) = spec.href() else {
            return Err(BuildError::InvalidXref(format!(
                "internal xref spec '{}' has no href",
                spec.uid
            )));
        };
        if is_absolute_url(href) || href.starts_with('/') {
            return Err(BuildError::InvalidXref(format!(
                "internal xref spec '{}' must have a relative href, found {:?}",
                spec.uid, href
            )));
        }
        if self.unknown.contains(&spec.uid) {
            return Err(BuildError::XrefClassified(spec.uid));
        }
        if self.is_sealed() {
            tracing::warn!(
                "Internal xref '{}' registered after outstanding resolution ran; documents \
                 already transformed may have resolved it differently",
                spec.uid
            );
        }

        let mut internal = self.internal.write();
        match internal.get(&spec.uid) {
            Some(existing) if existing != &spec => {
                tracing::warn!(
                    "Duplicate internal xref '{}': keeping href {:?}, ignoring {:?}",
                    spec.uid,
                    existing.href,
                    spec.href
                );
            }
            Some(_) => {}
            None => {
                self.external.remove(&spec.uid);
                internal.insert(spec.uid.clone(), spec);
            }
        }
        Ok(())
    }

    /// Note that content processing saw a reference to `uid`.
    pub fn register_reference(&self, uid: &str) {
        if !uid.is_empty() && !self.referenced.contains(uid) {
            self.referenced.insert(uid.to_string());
        }
    }

    pub fn internal_spec(&self, uid: &str) -> Option<XRefSpec> {
        self.internal.read().get(uid).cloned()
    }

    pub fn state(&self, uid: &str) -> Option<ResolutionState> {
        if let Some(spec) = self.internal_spec(uid) {
            Some(ResolutionState::Internal(spec))
        } else if let Some(spec) = self.external.get(uid) {
            Some(ResolutionState::ExternalResolved(spec.clone()))
        } else if self.unknown.contains(uid) {
            Some(ResolutionState::Unknown)
        } else {
            None
        }
    }

    /// Resolve `uid`, memoizing the outcome.
    pub fn get(&self, uid: &str) -> Option<XRefSpec> {
        if let Some(spec) = self.cached(uid) {
            return spec;
        }
        self.with_gate(uid, || {
            // Another worker may have finished while we waited on the gate.
            if let Some(spec) = self.cached(uid) {
                return spec;
            }
            let found = self
                .query_catalogs(uid)
                .or_else(|| self.query_packages(&[uid.to_string()]).remove(uid));
            match found {
                Some(spec) => self.merge_external(spec),
                None => {
                    tracing::debug!("Uid '{}' could not be resolved from any source", uid);
                    self.unknown.insert(uid.to_string());
                    None
                }
            }
        })
    }

    /// Steps 1-3. `Some(None)` means known-unresolved.
    fn cached(&self, uid: &str) -> Option<Option<XRefSpec>> {
        if let Some(spec) = self.internal_spec(uid) {
            return Some(Some(spec));
        }
        if let Some(spec) = self.external.get(uid) {
            self.stats.external_hits.fetch_add(1, Ordering::Relaxed);
            return Some(Some(spec.clone()));
        }
        if self.unknown.contains(uid) {
            self.stats.unknown_hits.fetch_add(1, Ordering::Relaxed);
            return Some(None);
        }
        None
    }

    /// Upsert an externally discovered spec, merging with any earlier report for the same uid.
    /// Returns the stored result, or `None` when the uid is internal or known-unresolved.
    pub fn report_external(&self, spec: XRefSpec) -> Option<XRefSpec> {
        if spec.uid.is_empty() {
            tracing::warn!("Ignoring external xref report without uid: {:?}", spec);
            return None;
        }
        let uid = spec.uid.clone();
        self.with_gate(&uid, || self.merge_external(spec))
    }

    /// Caller must hold the gate for `spec.uid`.
    fn merge_external(&self, spec: XRefSpec) -> Option<XRefSpec> {
        if self.internal.read().contains_key(&spec.uid) {
            tracing::debug!("Ignoring external spec for internal uid '{}'", spec.uid);
            return None;
        }
        if self.unknown.contains(&spec.uid) {
            tracing::debug!("Ignoring external spec for unresolvable uid '{}'", spec.uid);
            return None;
        }
        let stored = self
            .external
            .entry(spec.uid.clone())
            .and_modify(|existing| existing.merge(&spec))
            .or_insert(spec);
        Some(stored.value().clone())
    }

    fn with_gate<R, F: FnOnce() -> R>(&self, uid: &str, f: F) -> R {
        let gate = self.gates.entry(uid.to_string()).or_default().clone();
        let res = {
            let _guard = gate.lock();
            f()
        };
        drop(gate);
        // Cloning a gate happens under the shard lock, so a count of one means the map is
        // the last holder and nobody is waiting on it.
        self.gates.remove_if(uid, |_, held| Arc::strong_count(held) == 1);
        res
    }

    fn query_catalogs(&self, uid: &str) -> Option<XRefSpec> {
        self.catalogs.iter().find_map(|catalog| {
            self.stats.catalog_queries.fetch_add(1, Ordering::Relaxed);
            catalog.find(uid).cloned()
        })
    }

    /// Query the packages for every uid in one acquisition of the package index.
    fn query_packages(&self, uids: &[String]) -> BTreeMap<String, XRefSpec> {
        let Some(packages) = self.packages.as_ref() else {
            return BTreeMap::new();
        };
        if uids.is_empty() {
            return BTreeMap::new();
        }
        self.stats.package_opens.fetch_add(1, Ordering::Relaxed);
        let res = with_index(packages.as_ref(), |index| {
            let mut found = BTreeMap::new();
            for uid in uids.iter() {
                self.stats.package_queries.fetch_add(1, Ordering::Relaxed);
                let Some(record) = index.lookup(uid) else {
                    continue;
                };
                match record.to_spec() {
                    Ok(spec) if spec.uid == *uid => {
                        found.insert(uid.clone(), spec);
                    }
                    Ok(spec) => tracing::warn!(
                        "Package returned uid '{}' when asked for '{}'",
                        spec.uid,
                        uid
                    ),
                    Err(e) => tracing::warn!("Package record for '{}' is malformed: {}", uid, e),
                }
            }
            found
        });
        res.unwrap_or_else(|e| {
            tracing::warn!("Reference packages could not be opened: {}", e);
            BTreeMap::new()
        })
    }

    /// Resolve every uid that was referenced without an internal spec, and complete every
    /// external spec still missing an href, against catalogs then packages. Whatever remains
    /// unreferenced-by-any-source is recorded as unknown.
    ///
    /// Run once, after all internal registrations and before the transformation phase. Seals
    /// the resolver: later internal registrations are applied but logged.
    #[tracing::instrument(skip(self))]
    pub fn resolve_outstanding(&self) -> OutstandingReport {
        self.sealed.store(true, Ordering::Release);
        let mut report = OutstandingReport::default();

        let mut pending: BTreeSet<String> = {
            let internal = self.internal.read();
            self.referenced
                .iter()
                .filter(|uid| !internal.contains_key(uid.as_str()))
                .filter(|uid| !self.unknown.contains(uid.as_str()))
                .filter(|uid| {
                    self.external
                        .get(uid.as_str())
                        .is_none_or(|spec| spec.href().is_none())
                })
                .map(|uid| uid.key().clone())
                .collect()
        };
        pending.extend(
            self.external
                .iter()
                .filter(|entry| entry.value().href().is_none())
                .map(|entry| entry.key().clone()),
        );
        tracing::info!("Resolving {} outstanding uids", pending.len());

        pending.retain(|uid| match self.query_catalogs(uid) {
            Some(spec) => {
                self.with_gate(uid, || self.merge_external(spec));
                report.from_catalogs += 1;
                !self.is_complete(uid)
            }
            None => true,
        });

        let remaining: Vec<String> = pending.iter().cloned().collect();
        for (uid, spec) in self.query_packages(&remaining) {
            self.with_gate(&uid, || self.merge_external(spec));
            report.from_packages += 1;
            if self.is_complete(&uid) {
                pending.remove(&uid);
            }
        }

        for uid in pending {
            self.with_gate(&uid, || {
                if self.external.contains_key(&uid) {
                    report.incomplete.push(uid.clone());
                } else {
                    self.unknown.insert(uid.clone());
                    report.unknown.push(uid.clone());
                }
            });
        }
        if !report.unknown.is_empty() {
            tracing::warn!(
                "{} uids could not be resolved from any source: {:?}",
                report.unknown.len(),
                report.unknown
            );
        }
        tracing::info!("Outstanding resolution done. {}", self.stats());
        report
    }

    fn is_complete(&self, uid: &str) -> bool {
        self.external
            .get(uid)
            .is_some_and(|spec| spec.href().is_some())
    }

    /// The internal specs as a sorted catalog, suitable for publishing this build's xref map.
    pub fn export_catalog(&self, location: &str) -> XRefCatalog {
        let references = self.internal.read().values().cloned().collect();
        XRefCatalog::new(location, true, references)
    }

    pub fn external_specs(&self) -> Vec<XRefSpec> {
        let mut specs: Vec<XRefSpec> = self.external.iter().map(|e| e.value().clone()).collect();
        specs.sort_by(|a, b| a.uid.cmp(&b.uid));
        specs
    }

    pub fn unknown_uids(&self) -> BTreeSet<String> {
        self.unknown.iter().map(|uid| uid.key().clone()).collect()
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            catalog_queries: self.stats.catalog_queries.load(Ordering::Relaxed),
            package_opens: self.stats.package_opens.load(Ordering::Relaxed),
            package_queries: self.stats.package_queries.load(Ordering::Relaxed),
            external_hits: self.stats.external_hits.load(Ordering::Relaxed),
            unknown_hits: self.stats.unknown_hits.load(Ordering::Relaxed),
        }
    }
}
