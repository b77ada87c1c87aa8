use std::{fmt, io};

use quick_xml::Error as MarkupError;
use reqwest::Error as HttpError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;
use url::ParseError as UrlParseError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Invalid cross reference: {0}")]
    InvalidXref(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Markup error: {0}")]
    Markup(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("Template engine '{engine}' failed on '{path}': {message}")]
    Render {
        path: String,
        engine: String,
        message: String,
    },
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Uid '{0}' is already classified as unresolvable for this build")]
    XrefClassified(String),
}

impl BuildError {
    /// Wrap an engine failure with the offending document and engine names.
    pub fn render<E: fmt::Display>(path: &str, engine: &str, err: E) -> BuildError {
        BuildError::Render {
            path: path.to_string(),
            engine: engine.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for BuildError {
    fn from(src: toml::de::Error) -> BuildError {
        BuildError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for BuildError {
    fn from(src: toml::ser::Error) -> BuildError {
        BuildError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for BuildError {
    fn from(src: JsonError) -> BuildError {
        BuildError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for BuildError {
    fn from(src: YamlError) -> BuildError {
        BuildError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<UrlParseError> for BuildError {
    fn from(src: UrlParseError) -> BuildError {
        BuildError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<HttpError> for BuildError {
    fn from(src: HttpError) -> BuildError {
        if src.is_timeout() {
            BuildError::Network(format!("request timed out: {src}"))
        } else {
            BuildError::Network(format!("{src}"))
        }
    }
}

impl From<MarkupError> for BuildError {
    fn from(src: MarkupError) -> BuildError {
        BuildError::Markup(format!("{src}"))
    }
}

impl From<io::Error> for BuildError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => BuildError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => BuildError::PermissionDenied,
            _ => BuildError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

/// A fatal failure scoped to one document of the transformation phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("Failed to build '{source_path}': {error}")]
pub struct DocumentBuildError {
    pub source_path: String,
    pub error: BuildError,
}
