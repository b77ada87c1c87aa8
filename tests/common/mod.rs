//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use xrefbind::{
    context::BuildContext,
    source::SourceRegistry,
    xref::{XRefCatalog, XRefResolver, XRefSpec},
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write a YAML catalog of `(uid, href)` pairs into `temp_dir` and return its location.
#[allow(dead_code)]
pub fn write_catalog(
    temp_dir: &TempDir,
    name: &str,
    sorted: bool,
    entries: &[(&str, &str)],
) -> String {
    let mut text = format!("sorted: {sorted}\nreferences:\n");
    for (uid, href) in entries {
        text.push_str(&format!("  - uid: {uid}\n    name: {uid}\n    href: {href}\n"));
    }
    let path = temp_dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path.to_string_lossy().to_string()
}

#[allow(dead_code)]
pub fn catalog(entries: &[(&str, &str)]) -> XRefCatalog {
    XRefCatalog::new(
        "memory",
        false,
        entries
            .iter()
            .map(|(uid, href)| XRefSpec::new(*uid).with_name(*uid).with_href(*href))
            .collect(),
    )
}

#[allow(dead_code)]
pub fn context_with_catalog(entries: &[(&str, &str)]) -> BuildContext {
    init_logging();
    BuildContext::new(
        SourceRegistry::default(),
        XRefResolver::new(vec![catalog(entries)], None),
    )
}

/// Read an output file relative to `output_dir`.
#[allow(dead_code)]
pub fn read_output(output_dir: &Path, relative_path: &str) -> String {
    let path: PathBuf = output_dir.join(relative_path);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing output {path:?}: {e}"))
}
