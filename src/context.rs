//! The shared state of one build.
//!
//! A [`BuildContext`] is created once per build and handed by reference to every component.
//! The content phase fills the output map and the internal xref specs; then
//! [`BuildContext::resolve_outstanding`] acts as the barrier before the parallel transformation
//! phase, during which workers only read the output map and share the resolver's caches.
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    config::BuildConfig,
    error::BuildError,
    paths::{is_absolute_url, normalize_key, LinkPath},
    source::SourceRegistry,
    xref::{
        OutstandingReport, PackageSet, PackageSource, ResolutionState, XRefCatalog, XRefResolver,
        XRefSpec,
    },
};

#[derive(Debug, Default)]
pub struct BuildContext {
    sources: Arc<SourceRegistry>,
    resolver: XRefResolver,
    output_paths: RwLock<BTreeMap<String, String>>,
    toc_membership: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl BuildContext {
    pub fn new(sources: SourceRegistry, resolver: XRefResolver) -> Self {
        BuildContext {
            sources: Arc::new(sources),
            resolver,
            output_paths: RwLock::new(BTreeMap::new()),
            toc_membership: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a context from configuration, loading every configured catalog. Unavailable
    /// catalogs are skipped; packages are opened lazily per bulk query.
    #[tracing::instrument(skip_all)]
    pub async fn from_config(
        config: &BuildConfig,
        sources: SourceRegistry,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        let catalogs = XRefCatalog::load_all(&config.xref_maps, config.fetch_timeout()).await;
        let packages: Option<Arc<dyn PackageSource>> = if config.packages.is_empty() {
            None
        } else {
            Some(Arc::new(PackageSet::new(config.packages.clone())))
        };
        tracing::info!(
            "Build context ready: {} sources, {} of {} catalogs, {} packages",
            sources.len(),
            catalogs.len(),
            config.xref_maps.len(),
            config.packages.len()
        );
        Ok(BuildContext::new(sources, XRefResolver::new(catalogs, packages)))
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn resolver(&self) -> &XRefResolver {
        &self.resolver
    }

    pub fn get_output_path(&self, key: &str) -> Option<String> {
        self.output_paths.read().get(&normalize_key(key)).cloned()
    }

    pub fn set_output_path(&self, key: &str, output_path: &str) {
        if self.resolver.is_sealed() {
            tracing::warn!(
                "Output path for '{}' set after the transformation barrier",
                key
            );
        }
        let output_path = normalize_key(output_path);
        let previous = self
            .output_paths
            .write()
            .insert(normalize_key(key), output_path.clone());
        if let Some(previous) = previous.filter(|p| *p != output_path) {
            tracing::debug!(
                "Output path for '{}' changed from '{}' to '{}'",
                key,
                previous,
                output_path
            );
        }
    }

    pub fn output_paths(&self) -> BTreeMap<String, String> {
        self.output_paths.read().clone()
    }

    pub fn get_xref_spec(&self, uid: &str) -> Option<XRefSpec> {
        self.resolver.get(uid)
    }

    pub fn xref_state(&self, uid: &str) -> Option<ResolutionState> {
        self.resolver.state(uid)
    }

    /// Register a spec produced by this build. Its href is a working-folder key and is
    /// normalized as one.
    pub fn register_internal_xref(&self, mut spec: XRefSpec) -> Result<(), BuildError> {
        // Absolute and rooted hrefs are left for the resolver to reject.
        if let Some(href) = spec
            .href()
            .filter(|href| !href.starts_with('/') && !is_absolute_url(href))
        {
            let link = LinkPath::new(href);
            let key = normalize_key(link.filepath());
            if !key.is_empty() {
                spec.href = Some(format!("{}{}", key, link.suffix()));
            }
        }
        self.resolver.register_internal(spec)
    }

    pub fn register_xref_reference(&self, uid: &str) {
        self.resolver.register_reference(uid)
    }

    pub fn report_external_xref(&self, spec: XRefSpec) -> Option<XRefSpec> {
        self.resolver.report_external(spec)
    }

    pub fn register_toc(&self, toc_key: &str, file_key: &str) {
        let toc_key = normalize_key(toc_key);
        let mut membership = self.toc_membership.write();
        let tocs = membership.entry(normalize_key(file_key)).or_default();
        if !tocs.insert(toc_key) {
            tracing::trace!("Toc membership for '{}' already recorded", file_key);
        }
    }

    pub fn get_toc_membership(&self, file_key: &str) -> BTreeSet<String> {
        self.toc_membership
            .read()
            .get(&normalize_key(file_key))
            .cloned()
            .unwrap_or_default()
    }

    /// The barrier between the content and transformation phases.
    pub fn resolve_outstanding(&self) -> OutstandingReport {
        self.resolver.resolve_outstanding()
    }
}
