//! Loading catalogs from their configured locations.

mod common;

use common::*;
use std::time::Duration;
use tempfile::TempDir;
use xrefbind::{
    config::BuildConfig, context::BuildContext, source::SourceRegistry, xref::XRefCatalog,
    BuildError,
};

#[tokio::test]
async fn local_catalog_loads() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let location = write_catalog(
        &dir,
        "xrefmap.yml",
        true,
        &[("A", "api/A.html"), ("B", "api/B.html")],
    );
    let catalog = XRefCatalog::load(&location, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(catalog.is_sorted());
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.find("B").and_then(|s| s.href()), Some("api/B.html"));
}

#[tokio::test]
async fn unsupported_scheme_is_an_error() {
    init_logging();
    let res = XRefCatalog::load("ftp://example.com/xrefmap.yml", Duration::from_secs(2)).await;
    assert!(matches!(res, Err(BuildError::Network(_))));
}

#[tokio::test]
async fn unreachable_catalogs_are_skipped() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let good = write_catalog(&dir, "good.yml", false, &[("A", "a.html")]);
    let malformed = dir.path().join("malformed.yml");
    std::fs::write(&malformed, "references: [this is: not: valid").unwrap();

    let locations = vec![
        "http://127.0.0.1:9/xrefmap.yml".to_string(),
        dir.path().join("missing.yml").to_string_lossy().to_string(),
        malformed.to_string_lossy().to_string(),
        good.clone(),
    ];
    let catalogs = XRefCatalog::load_all(&locations, Duration::from_secs(2)).await;
    assert_eq!(catalogs.len(), 1);
    assert_eq!(catalogs[0].location(), good);
}

#[tokio::test]
async fn context_from_config_uses_configured_order() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let first = write_catalog(&dir, "first.yml", false, &[("A", "first/A.html")]);
    let second = write_catalog(
        &dir,
        "second.yml",
        true,
        &[("A", "second/A.html"), ("B", "second/B.html")],
    );
    let config = BuildConfig {
        xref_maps: vec![first, second],
        fetch_timeout_secs: 2,
        ..Default::default()
    };
    let ctx = BuildContext::from_config(&config, SourceRegistry::default())
        .await
        .unwrap();
    assert_eq!(ctx.get_xref_spec("A").unwrap().href(), Some("first/A.html"));
    assert_eq!(ctx.get_xref_spec("B").unwrap().href(), Some("second/B.html"));
}
