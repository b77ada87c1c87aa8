//! External cross-reference catalogs ("xref maps").
//!
//! A catalog is a YAML (or JSON) document:
//!
//! ```yaml
//! sorted: true
//! baseUrl: https://docs.example.com/
//! references:
//!   - uid: System.String
//!     name: String
//!     href: api/System.String.html
//! ```
//!
//! `sorted: true` is a promise that `references` is ordered by uid (ordinal comparison), which
//! lets [`XRefCatalog::find`] binary search. The promise is checked when the catalog is built;
//! a catalog that breaks it is downgraded to linear lookup and a warning is logged.
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use url::Url;

use crate::{error::BuildError, paths::is_absolute_url, xref::spec::XRefSpec};

/// On-disk/over-the-wire shape of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    #[serde(default)]
    pub sorted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub references: Vec<XRefSpec>,
}

/// An in-memory catalog ready for lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XRefCatalog {
    location: String,
    sorted: bool,
    references: Vec<XRefSpec>,
}

fn is_sorted_by_uid(references: &[XRefSpec]) -> bool {
    references.windows(2).all(|pair| pair[0].uid <= pair[1].uid)
}

impl XRefCatalog {
    /// Build a catalog from already-loaded entries. `sorted` is validated against the data.
    pub fn new<S: Into<String>>(location: S, sorted: bool, references: Vec<XRefSpec>) -> Self {
        let location = location.into();
        let sorted = if sorted && !is_sorted_by_uid(&references) {
            tracing::warn!(
                "Catalog {} claims to be sorted but its references are not ordered by uid. \
                 Falling back to linear lookup.",
                location
            );
            false
        } else {
            sorted
        };
        XRefCatalog {
            location,
            sorted,
            references,
        }
    }

    /// Build a catalog from a parsed document. Relative hrefs are made absolute against the
    /// document's `baseUrl`, or against `fetched_from` when the document has none.
    pub fn from_document(
        location: &str,
        doc: CatalogDocument,
        fetched_from: Option<&Url>,
    ) -> Result<Self, BuildError> {
        let base = match doc.base_url.as_deref() {
            Some(base_url) => Some(Url::parse(base_url)?),
            None => fetched_from.cloned(),
        };
        let mut references = doc.references;
        if let Some(base) = base {
            for spec in references.iter_mut() {
                let Some(href) = spec.href().filter(|href| !is_absolute_url(href)) else {
                    continue;
                };
                match base.join(href) {
                    Ok(absolute) => spec.href = Some(absolute.to_string()),
                    Err(e) => tracing::warn!(
                        "Catalog {}: could not make href {:?} of uid {} absolute: {}",
                        location,
                        href,
                        spec.uid,
                        e
                    ),
                }
            }
        }
        Ok(XRefCatalog::new(location, doc.sorted, references))
    }

    pub fn parse(location: &str, text: &str, fetched_from: Option<&Url>) -> Result<Self, BuildError> {
        let doc: CatalogDocument = serde_yaml::from_str(text)?;
        XRefCatalog::from_document(location, doc, fetched_from)
    }

    /// Load a catalog from an `http(s)` URL or a local file path.
    #[tracing::instrument(skip(timeout))]
    pub async fn load(location: &str, timeout: Duration) -> Result<Self, BuildError> {
        match Url::parse(location) {
            // Single letter schemes are Windows drive letters, not URLs.
            Ok(url) if url.scheme().len() > 1 => match url.scheme() {
                "http" | "https" => {
                    let client = reqwest::Client::builder().timeout(timeout).build()?;
                    let response = client.get(url.clone()).send().await?.error_for_status()?;
                    let text = response.text().await?;
                    XRefCatalog::parse(location, &text, Some(&url))
                }
                scheme => Err(BuildError::Network(format!(
                    "unsupported catalog scheme '{scheme}' in {location}"
                ))),
            },
            _ => {
                let text = tokio::fs::read_to_string(location).await?;
                XRefCatalog::parse(location, &text, None)
            }
        }
    }

    /// Load every location concurrently, keeping configured order. Unavailable catalogs are
    /// logged and left out.
    pub async fn load_all(locations: &[String], timeout: Duration) -> Vec<XRefCatalog> {
        let loaded = join_all(
            locations
                .iter()
                .map(|location| XRefCatalog::load(location, timeout)),
        )
        .await;
        locations
            .iter()
            .zip(loaded)
            .filter_map(|(location, res)| match res {
                Ok(catalog) => {
                    tracing::info!(
                        "Loaded catalog {} ({} references, sorted: {})",
                        location,
                        catalog.len(),
                        catalog.sorted
                    );
                    Some(catalog)
                }
                Err(e) => {
                    tracing::warn!("Catalog {} is unavailable and will be skipped: {}", location, e);
                    None
                }
            })
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BuildError> {
        let doc = CatalogDocument {
            sorted: self.sorted,
            base_url: None,
            references: self.references.clone(),
        };
        std::fs::write(path, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }

    /// Exact-uid lookup. Binary search when sorted, linear scan otherwise; both return the
    /// first entry carrying `uid`.
    pub fn find(&self, uid: &str) -> Option<&XRefSpec> {
        if self.sorted {
            let mut idx = self
                .references
                .binary_search_by(|spec| spec.uid.as_str().cmp(uid))
                .ok()?;
            while idx > 0 && self.references[idx - 1].uid == uid {
                idx -= 1;
            }
            self.references.get(idx)
        } else {
            self.references.iter().find(|spec| spec.uid == uid)
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn references(&self) -> &[XRefSpec] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}
