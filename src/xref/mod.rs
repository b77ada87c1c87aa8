//! Cross-reference resolution across the three tiers of knowledge: documents built in this run
//! (internal specs), external catalogs, and reference packages.
//!
//! ## Key Components
//!
//! - [`XRefSpec`] - a uid's resolved target plus display metadata, with the field merge policy
//! - [`XRefCatalog`] - an optionally sorted list of specs loaded from a URL or file
//! - [`PackageIndex`] / [`PackageSource`] - scoped lookups over reference packages
//! - [`XRefResolver`] - the memoizing resolution state machine shared by all workers

pub mod catalog;
pub mod package;
pub mod resolver;
pub mod spec;

pub use catalog::{CatalogDocument, XRefCatalog};
pub use package::{
    with_index, PackageIndex, PackageSet, PackageSnapshot, PackageSource, ReferenceRecord,
};
pub use resolver::{OutstandingReport, ResolutionState, ResolverStatsSnapshot, XRefResolver};
pub use spec::XRefSpec;
