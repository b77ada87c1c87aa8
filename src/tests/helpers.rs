//! Shared test utilities for resolver and context testing

use crate::{
    context::BuildContext,
    source::SourceRegistry,
    xref::{PackageSnapshot, PackageSource, ReferenceRecord, XRefCatalog, XRefResolver, XRefSpec},
};
use std::{path::Path, sync::Arc};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A catalog of `(uid, href)` pairs, sorted or not as requested.
pub fn create_test_catalog(location: &str, sorted: bool, entries: &[(&str, &str)]) -> XRefCatalog {
    let mut references: Vec<XRefSpec> = entries
        .iter()
        .map(|(uid, href)| XRefSpec::new(*uid).with_name(*uid).with_href(*href))
        .collect();
    if sorted {
        references.sort_by(|a, b| a.uid.cmp(&b.uid));
    }
    XRefCatalog::new(location, sorted, references)
}

pub fn create_test_packages(entries: &[(&str, &str)]) -> Arc<dyn PackageSource> {
    Arc::new(PackageSnapshot::from_records(entries.iter().map(
        |(uid, href)| ReferenceRecord {
            uid: uid.to_string(),
            name: Some(uid.to_string()),
            href: Some(href.to_string()),
            ..Default::default()
        },
    )))
}

/// Write a package file in the on-disk record format.
pub fn write_test_package(path: &Path, entries: &[(&str, &str)]) {
    let mut text = String::from("references:\n");
    for (uid, href) in entries {
        text.push_str(&format!("  - uid: {uid}\n    name: {uid}\n    href: {href}\n"));
    }
    std::fs::write(path, text).unwrap();
}

/// A context with one catalog and one package snapshot, no internal specs yet.
pub fn create_test_context(
    catalog: &[(&str, &str)],
    packages: &[(&str, &str)],
) -> BuildContext {
    init_logging();
    BuildContext::new(
        SourceRegistry::default(),
        XRefResolver::new(
            vec![create_test_catalog("test-catalog", true, catalog)],
            Some(create_test_packages(packages)),
        ),
    )
}
