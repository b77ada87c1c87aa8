//! The parallel transformation phase.
//!
//! Each [`DocumentModel`] is rendered through a [`TemplateRenderer`] into one output per
//! extension, markup outputs are passed through the [`LinkRewriter`], and every output is
//! hashed while it is written. Markup the rewriter cannot parse is written unmodified with a
//! warning. Documents are independent: a failing document produces a [`DocumentBuildError`]
//! (with its model exported for diagnosis), leaves none of its outputs on disk, and the rest
//! carry on.
use rayon::prelude::*;
use serde_json::Value;
use std::{
    fs::{create_dir_all, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    config::{BuildConfig, GLOBAL_METADATA_KEY},
    context::BuildContext,
    error::{BuildError, DocumentBuildError},
    manifest::{HashingWriter, Manifest, ManifestItem},
    paths::{normalize_key, LinkPath},
};

pub mod rewriter;

pub use rewriter::{LinkRewriter, RewriteReport, XrefNode, XrefOutcome};

/// What a template engine hands back for one output.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// A transformed intermediate model, written out as JSON.
    Model(Value),
    /// Final markup or text.
    Markup(String),
}

/// The boundary to an external template engine.
pub trait TemplateRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// Output extensions (with leading dot) produced for `document_type`.
    fn extensions(&self, document_type: &str) -> Vec<String>;

    fn render(
        &self,
        document_type: &str,
        extension: &str,
        model: &Value,
    ) -> Result<Rendered, BuildError>;
}

/// One document's content model as handed over by content processing.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentModel {
    /// Working-folder key of the source file.
    pub key: String,
    pub document_type: String,
    pub model: Value,
}

impl DocumentModel {
    pub fn new<K: Into<String>, T: Into<String>>(key: K, document_type: T, model: Value) -> Self {
        DocumentModel {
            key: key.into(),
            document_type: document_type.into(),
            model,
        }
    }

    /// Output path without extension: the mapped output path when there is one, else the key.
    fn output_base(&self, context: &BuildContext) -> String {
        let key = normalize_key(&self.key);
        let path = context.get_output_path(&key).unwrap_or(key);
        let filename = LinkPath::new(&path).filename();
        match filename.rfind('.') {
            Some(dot) if dot > 0 => path[..path.len() - (filename.len() - dot)].to_string(),
            _ => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub manifest: Manifest,
    pub errors: Vec<DocumentBuildError>,
}

fn is_markup(extension: &str) -> bool {
    matches!(
        extension.trim_start_matches('.').to_ascii_lowercase().as_str(),
        "html" | "htm"
    )
}

pub struct Transformer<'a, R: TemplateRenderer + ?Sized> {
    context: &'a BuildContext,
    renderer: &'a R,
    config: &'a BuildConfig,
}

impl<'a, R: TemplateRenderer + ?Sized> Transformer<'a, R> {
    pub fn new(context: &'a BuildContext, renderer: &'a R, config: &'a BuildConfig) -> Self {
        Transformer {
            context,
            renderer,
            config,
        }
    }

    /// Transform every document on a pool of at most `max_parallelism` workers.
    ///
    /// Must run after [`BuildContext::resolve_outstanding`]; a context that has not passed
    /// that barrier is resolved here first.
    #[tracing::instrument(skip_all, fields(documents = documents.len()))]
    pub fn transform(&self, documents: Vec<DocumentModel>) -> Result<TransformReport, BuildError> {
        if !self.context.resolver().is_sealed() {
            tracing::warn!("Transformation started before outstanding xrefs were resolved");
            self.context.resolve_outstanding();
        }
        let workers = self.config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("xrefbind-transform-{idx}"))
            .build()
            .map_err(|e| BuildError::Custom(format!("could not start worker pool: {e}")))?;
        tracing::info!(
            "Transforming {} documents on {} workers with '{}'",
            documents.len(),
            workers,
            self.renderer.name()
        );

        let results: Vec<Result<ManifestItem, DocumentBuildError>> = pool.install(|| {
            documents
                .into_par_iter()
                .map(|doc| self.transform_document(doc))
                .collect()
        });

        let mut items = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for res in results {
            match res {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::error!("{}", e);
                    errors.push(e);
                }
            }
        }
        tracing::info!(
            "Transformed {} documents, {} failed. {}",
            items.len(),
            errors.len(),
            self.context.resolver().stats()
        );
        Ok(TransformReport {
            manifest: Manifest::new(items),
            errors,
        })
    }

    pub fn transform_document(&self, doc: DocumentModel) -> Result<ManifestItem, DocumentBuildError> {
        let source_path = doc.key.clone();
        let fail = |error: BuildError| DocumentBuildError {
            source_path: source_path.clone(),
            error,
        };

        let output_base = doc.output_base(self.context);
        let DocumentModel {
            key,
            document_type,
            mut model,
        } = doc;
        match &mut model {
            Value::Object(map) => {
                map.insert(
                    GLOBAL_METADATA_KEY.to_string(),
                    Value::Object(self.config.global_metadata.clone()),
                );
            }
            other => {
                return Err(fail(BuildError::Custom(format!(
                    "document model must be an object, found {}",
                    value_kind(other)
                ))))
            }
        }

        let mut item = ManifestItem::new(document_type.as_str(), key.as_str());
        // A failing document leaves no outputs behind, including those of earlier extensions.
        let discard = |item: &ManifestItem| {
            for output in item.output.values() {
                self.remove_output(&output.relative_path);
            }
        };
        for extension in self.renderer.extensions(&document_type) {
            let rendered = match self.renderer.render(&document_type, &extension, &model) {
                Ok(rendered) => rendered,
                Err(e) => {
                    discard(&item);
                    self.export_model(&key, &model);
                    return Err(match e {
                        BuildError::Render { .. } => fail(e),
                        other => fail(BuildError::render(&key, self.renderer.name(), other)),
                    });
                }
            };
            let relative_path = format!("{output_base}{extension}");
            let (hash, report) = match self.write_output(&relative_path, &extension, rendered) {
                Ok(written) => written,
                Err(e) => {
                    discard(&item);
                    return Err(fail(e));
                }
            };
            if let Some(report) = report {
                let unresolved = report.unresolved_strict();
                if !unresolved.is_empty() {
                    item.metadata.insert(
                        "unresolvedXrefs".to_string(),
                        Value::from(unresolved.into_iter().collect::<Vec<_>>()),
                    );
                }
            }
            item.record_output(&extension, &relative_path, hash);
        }
        Ok(item)
    }

    fn write_output(
        &self,
        relative_path: &str,
        extension: &str,
        rendered: Rendered,
    ) -> Result<(String, Option<RewriteReport>), BuildError> {
        let mut report = None;
        let bytes = match rendered {
            Rendered::Markup(markup) if is_markup(extension) => {
                let rewriter = LinkRewriter::new(self.context, self.config.display_language.as_str());
                match rewriter.rewrite(&markup, relative_path, Vec::new()) {
                    Ok((bytes, rewritten)) => {
                        report = Some(rewritten);
                        bytes
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{}: links were not rewritten, writing the rendered markup as is: {}",
                            relative_path,
                            e
                        );
                        markup.into_bytes()
                    }
                }
            }
            Rendered::Markup(text) => text.into_bytes(),
            Rendered::Model(model) => serde_json::to_vec_pretty(&model)?,
        };

        let path = self.config.output_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let written = File::create(&path).map_err(BuildError::from).and_then(|file| {
            let mut sink = HashingWriter::new(BufWriter::new(file));
            sink.write_all(&bytes)?;
            let (_, hash) = sink.finish()?;
            Ok(hash)
        });
        match written {
            Ok(hash) => {
                tracing::debug!("Wrote {:?} ({})", path, hash);
                Ok((hash, report))
            }
            Err(e) => {
                self.remove_output(relative_path);
                Err(e)
            }
        }
    }

    fn remove_output(&self, relative_path: &str) {
        let path = self.config.output_dir.join(relative_path);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove partial output {:?}: {}", path, e);
            }
        }
    }

    /// Best effort: a failing export is logged and does not mask the render error.
    fn export_model(&self, key: &str, model: &Value) {
        let path = diagnostics_path(&self.config.diagnostics_dir(), key);
        let res = path
            .parent()
            .map_or(Ok(()), create_dir_all)
            .map_err(BuildError::from)
            .and_then(|_| Ok(serde_json::to_string_pretty(model)?))
            .and_then(|text| Ok(std::fs::write(&path, text)?));
        match res {
            Ok(()) => tracing::info!("Exported failing model of '{}' to {:?}", key, path),
            Err(e) => tracing::warn!("Could not export the model of '{}': {}", key, e),
        }
    }
}

pub fn diagnostics_path(diagnostics_dir: &Path, key: &str) -> PathBuf {
    diagnostics_dir.join(format!("{}.raw.model.json", normalize_key(key)))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{manifest::hash_file, xref::XRefSpec};
    use serde_json::json;
    use test_log::test;

    /// Renders `content` as html and the whole model as a json model output.
    struct PageRenderer;

    impl TemplateRenderer for PageRenderer {
        fn name(&self) -> &str {
            "page"
        }

        fn extensions(&self, _document_type: &str) -> Vec<String> {
            vec![".html".to_string(), ".json".to_string()]
        }

        fn render(
            &self,
            _document_type: &str,
            extension: &str,
            model: &Value,
        ) -> Result<Rendered, BuildError> {
            if extension == ".json" {
                return Ok(Rendered::Model(model.clone()));
            }
            let content = model
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| BuildError::Custom("model has no content".to_string()))?;
            let title = model["__global"]["_appTitle"].as_str().unwrap_or("");
            Ok(Rendered::Markup(format!("<h1>{title}</h1>{content}")))
        }
    }

    #[test]
    fn test_transform_writes_hashes_and_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = BuildConfig {
            output_dir: dir.path().join("site"),
            max_parallelism: 2,
            ..Default::default()
        };
        config
            .global_metadata
            .insert("_appTitle".to_string(), json!("Docs"));

        let ctx = BuildContext::default();
        ctx.set_output_path("api/A.md", "api/A.html");
        ctx.set_output_path("articles/b.md", "articles/b.html");
        ctx.register_internal_xref(XRefSpec::new("A").with_name("A").with_href("api/A.md"))
            .unwrap();
        ctx.resolve_outstanding();

        let docs = vec![
            DocumentModel::new(
                "articles/b.md",
                "Conceptual",
                json!({"content": r#"<p><xref uid="A"/> <a href="xref:Gone"></a> <a href="~/api/A.md">A</a></p>"#}),
            ),
            DocumentModel::new("broken.md", "Conceptual", json!({"title": "no content"})),
            DocumentModel::new("scalar.md", "Conceptual", json!(42)),
        ];
        let report = Transformer::new(&ctx, &PageRenderer, &config)
            .transform(docs)
            .unwrap();

        assert_eq!(report.manifest.files.len(), 1);
        let item = report.manifest.find("articles/b.md").unwrap();
        assert_eq!(item.output[".html"].relative_path, "articles/b.html");
        assert_eq!(item.output[".json"].relative_path, "articles/b.json");
        assert_eq!(item.metadata["unresolvedXrefs"], json!(["Gone"]));

        let html = std::fs::read_to_string(config.output_dir.join("articles/b.html")).unwrap();
        assert_eq!(
            html,
            concat!(
                r#"<h1>Docs</h1><p><a class="xref" href="../api/A.html">A</a> "#,
                r#"<span class="xref">Gone</span> <a href="../api/A.html">A</a></p>"#
            )
        );
        for info in item.output.values() {
            let path = config.output_dir.join(&info.relative_path);
            assert_eq!(hash_file(&path).unwrap(), info.hash);
        }
        assert!(report.manifest.verify(&config.output_dir).unwrap().is_empty());

        assert_eq!(report.errors.len(), 2);
        let broken = report
            .errors
            .iter()
            .find(|e| e.source_path == "broken.md")
            .unwrap();
        assert!(matches!(
            &broken.error,
            BuildError::Render { engine, path, .. } if engine == "page" && path == "broken.md"
        ));
        assert!(diagnostics_path(&config.diagnostics_dir(), "broken.md").exists());
        assert!(report.errors.iter().any(|e| e.source_path == "scalar.md"));
    }

    /// Renders html, then fails on the second output.
    struct HalfRenderer;

    impl TemplateRenderer for HalfRenderer {
        fn name(&self) -> &str {
            "half"
        }

        fn extensions(&self, _document_type: &str) -> Vec<String> {
            vec![".html".to_string(), ".pdf".to_string()]
        }

        fn render(
            &self,
            _document_type: &str,
            extension: &str,
            _model: &Value,
        ) -> Result<Rendered, BuildError> {
            match extension {
                ".html" => Ok(Rendered::Markup("<p>first</p>".to_string())),
                _ => Err(BuildError::Custom("no pdf support".to_string())),
            }
        }
    }

    #[test]
    fn test_failed_document_leaves_no_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BuildConfig {
            output_dir: dir.path().join("site"),
            ..Default::default()
        };
        let ctx = BuildContext::default();
        ctx.resolve_outstanding();

        let report = Transformer::new(&ctx, &HalfRenderer, &config)
            .transform(vec![DocumentModel::new("a.md", "Conceptual", json!({}))])
            .unwrap();
        assert!(report.manifest.files.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(!config.output_dir.join("a.html").exists());
    }

    #[test]
    fn test_unparseable_markup_is_written_as_is() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BuildConfig {
            output_dir: dir.path().join("site"),
            ..Default::default()
        };
        let ctx = BuildContext::default();
        ctx.set_output_path("a.md", "a.html");
        ctx.resolve_outstanding();

        let content = r#"<p>Tom & Jerry <a href="~/a.md">a</a></p><!-- never closed"#;
        let report = Transformer::new(&ctx, &PageRenderer, &config)
            .transform(vec![DocumentModel::new(
                "a.md",
                "Conceptual",
                json!({ "content": content }),
            )])
            .unwrap();
        assert!(report.errors.is_empty());
        let item = report.manifest.find("a.md").unwrap();
        let html = std::fs::read_to_string(config.output_dir.join("a.html")).unwrap();
        assert_eq!(html, format!("<h1></h1>{content}"));
        assert_eq!(hash_file(&config.output_dir.join("a.html")).unwrap(), item.output[".html"].hash);
    }

    #[test]
    fn test_output_base() {
        let ctx = BuildContext::default();
        ctx.set_output_path("docs/a.md", "site/a.html");
        assert_eq!(
            DocumentModel::new("docs/a.md", "Conceptual", json!({})).output_base(&ctx),
            "site/a"
        );
        assert_eq!(
            DocumentModel::new("~/docs/b.md", "Conceptual", json!({})).output_base(&ctx),
            "docs/b"
        );
        assert_eq!(
            DocumentModel::new("docs/.hidden", "Conceptual", json!({})).output_base(&ctx),
            "docs/.hidden"
        );
        assert!(is_markup(".HTML"));
        assert!(!is_markup(".json"));
    }
}
