//! The resolved description of a uid's target.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata key holding the fully qualified display name of a spec.
pub const FULL_NAME: &str = "fullName";

/// An xref spec: `uid` plus where it lives (`href`) and how to display it.
///
/// Any field other than `uid`, `name` and `href` lands in `metadata`, so catalogs written by
/// other tools round-trip without loss (`commentId`, `nameWithType`, `name.csharp`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XRefSpec {
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

impl XRefSpec {
    pub fn new<U: Into<String>>(uid: U) -> XRefSpec {
        XRefSpec {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> XRefSpec {
        self.name = name.into();
        self
    }

    pub fn with_href<S: Into<String>>(mut self, href: S) -> XRefSpec {
        self.href = Some(href.into());
        self
    }

    pub fn with_meta<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> XRefSpec {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The href, treating an empty string as absent.
    pub fn href(&self) -> Option<&str> {
        self.href.as_deref().filter(|href| !href.is_empty())
    }

    /// String metadata for `key`, if present and non-empty.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Display text for `property`, preferring the language-qualified variant
    /// (`name.csharp`) over the plain property, then `name`, then the uid itself.
    pub fn display_text(&self, property: &str, language: &str) -> &str {
        let qualified = format!("{property}.{language}");
        self.meta_str(&qualified)
            .or_else(|| match property {
                "name" => Some(self.name.as_str()).filter(|n| !n.is_empty()),
                _ => self.meta_str(property),
            })
            .or_else(|| Some(self.name.as_str()).filter(|n| !n.is_empty()))
            .unwrap_or(&self.uid)
    }

    /// Merge `other` into `self`, field by field. A field that already holds a non-empty value
    /// keeps it; empty or missing fields take `other`'s value. For specs whose non-empty fields
    /// are disjoint the merge is commutative.
    pub fn merge(&mut self, other: &XRefSpec) {
        debug_assert!(self.uid == other.uid || self.uid.is_empty());
        if self.uid.is_empty() {
            self.uid = other.uid.clone();
        }
        if self.name.is_empty() && !other.name.is_empty() {
            self.name = other.name.clone();
        }
        if self.href().is_none() {
            if let Some(href) = other.href() {
                self.href = Some(href.to_string());
            }
        }
        for (key, value) in other.metadata.iter() {
            if is_empty_value(value) {
                continue;
            }
            match self.metadata.get_mut(key) {
                Some(existing) if !is_empty_value(existing) => {}
                Some(existing) => *existing = value.clone(),
                None => {
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Return a merged copy without mutating either input.
    pub fn merged(&self, other: &XRefSpec) -> XRefSpec {
        let mut res = self.clone();
        res.merge(other);
        res
    }
}
