//! # xrefbind
//!
//! Cross-reference resolution and link binding for static documentation builds.
//!
//! ## Overview
//!
//! A documentation build produces many documents that link to each other and to symbols
//! documented elsewhere. xrefbind is the core that ties those links together once content
//! processing has run: it knows which uids this build defines, which ones external catalogs
//! and reference packages define, and rewrites every rendered output so its links point at
//! the right place relative to where the output lands.
//!
//! ### Key Features
//!
//! - **Three-tier resolution**: internal specs always win, then external catalogs in configured
//!   order, then reference packages. Every outcome is memoized, including failures.
//! - **Concurrent-safe caches**: transformation workers share one resolver; concurrent lookups
//!   of a uid query external sources at most once and merges never lose fields.
//! - **Graceful degradation**: unreachable catalogs, unresolved uids and unmapped links are
//!   logged and replaced with a best-effort rendering, never fatal to the build.
//! - **Hashed manifest**: every output is hashed while it is written and recorded per document.
//!
//! ## Architecture
//!
//! - **[`source`]**: deduplication of the initial source file set (`SourceRegistry`)
//! - **[`xref`]**: specs, catalogs, reference packages and the resolver state machine
//! - **[`context`]**: `BuildContext`, the single shared object of one build
//! - **[`transform`]**: the parallel transformation phase and the `LinkRewriter`
//! - **[`manifest`]**: per-document output records and content hashes
//! - **[`paths`]**: working-folder keys and output-relative link arithmetic
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use xrefbind::{
//!     config::BuildConfig,
//!     context::BuildContext,
//!     source::{DeclaredType, FileDescriptor, SourceRegistry},
//!     transform::{DocumentModel, Rendered, TemplateRenderer, Transformer},
//!     xref::XRefSpec,
//!     BuildError,
//! };
//!
//! struct Passthrough;
//!
//! impl TemplateRenderer for Passthrough {
//!     fn name(&self) -> &str {
//!         "passthrough"
//!     }
//!     fn extensions(&self, _document_type: &str) -> Vec<String> {
//!         vec![".html".to_string()]
//!     }
//!     fn render(&self, _: &str, _: &str, model: &serde_json::Value) -> Result<Rendered, BuildError> {
//!         Ok(Rendered::Markup(model["content"].as_str().unwrap_or_default().to_string()))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BuildConfig::load("xrefbind.toml")?;
//!     let sources = SourceRegistry::register(vec![FileDescriptor::new(
//!         "docs",
//!         "api/A.md",
//!         DeclaredType::Article,
//!     )]);
//!     let ctx = BuildContext::from_config(&config, sources).await?;
//!
//!     // Content phase: output paths and internal specs.
//!     ctx.set_output_path("api/A.md", "api/A.html");
//!     ctx.register_internal_xref(XRefSpec::new("A").with_name("A").with_href("api/A.md"))?;
//!     ctx.register_xref_reference("System.String");
//!
//!     // Barrier, then the parallel phase.
//!     ctx.resolve_outstanding();
//!     let docs = vec![DocumentModel::new(
//!         "api/A.md",
//!         "ManagedReference",
//!         json!({"content": "<p>See <xref uid=\"System.String\"/></p>"}),
//!     )];
//!     let report = Transformer::new(&ctx, &Passthrough, &config).transform(docs)?;
//!     report.manifest.save(config.output_dir.join("manifest.json"))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod source;
#[cfg(test)]
mod tests;
pub mod transform;
pub mod xref;

pub use error::*;
