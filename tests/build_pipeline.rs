//! A full build: content phase, barrier, parallel transformation and manifest verification.

mod common;

use common::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use xrefbind::{
    config::BuildConfig,
    context::BuildContext,
    manifest::{Manifest, VerifyIssue},
    source::{DeclaredType, FileDescriptor, SourceRegistry},
    transform::{DocumentModel, Rendered, TemplateRenderer, Transformer},
    xref::{XRefResolver, XRefSpec},
    BuildError,
};

struct ArticleRenderer;

impl TemplateRenderer for ArticleRenderer {
    fn name(&self) -> &str {
        "article"
    }

    fn extensions(&self, document_type: &str) -> Vec<String> {
        match document_type {
            "Resource" => vec![".txt".to_string()],
            _ => vec![".html".to_string()],
        }
    }

    fn render(
        &self,
        _document_type: &str,
        _extension: &str,
        model: &Value,
    ) -> Result<Rendered, BuildError> {
        model
            .get("content")
            .and_then(Value::as_str)
            .map(|content| Rendered::Markup(content.to_string()))
            .ok_or_else(|| BuildError::Custom("missing content".to_string()))
    }
}

#[test]
fn build_rewrites_links_and_records_hashes() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let config = BuildConfig {
        output_dir: dir.path().join("_site"),
        max_parallelism: 3,
        ..Default::default()
    };
    let sources = SourceRegistry::register(vec![
        FileDescriptor::new("/repo", "api/A.md", DeclaredType::Article),
        FileDescriptor::new("/repo", "articles/intro.md", DeclaredType::Article),
        FileDescriptor::new("/repo", "articles/notes.txt", DeclaredType::Resource),
    ]);
    let ctx = BuildContext::new(
        sources,
        XRefResolver::new(
            vec![catalog(&[("System.String", "https://learn.example.com/system.string")])],
            None,
        ),
    );

    // Content phase.
    let keys: Vec<String> = ctx.sources().files().keys().cloned().collect();
    for key in keys.iter() {
        let output = key.replace(".md", ".html");
        ctx.set_output_path(key, &output);
    }
    ctx.register_internal_xref(XRefSpec::new("A").with_name("A").with_href("api/A.md"))
        .unwrap();
    ctx.register_toc("toc.yml", "api/A.md");
    ctx.register_xref_reference("System.String");
    ctx.register_xref_reference("Missing.Type");

    let outstanding = ctx.resolve_outstanding();
    assert_eq!(outstanding.from_catalogs, 1);
    assert_eq!(outstanding.unknown, vec!["Missing.Type".to_string()]);

    let documents = vec![
        DocumentModel::new(
            "api/A.md",
            "ManagedReference",
            json!({"content": r#"<h1>A</h1><p>Returns <xref uid="System.String"/>.</p>"#}),
        ),
        DocumentModel::new(
            "articles/intro.md",
            "Conceptual",
            json!({"content": r#"<p><a href="xref:A">the A type</a>, <a href="xref:Missing.Type"></a>, <a href="~/articles/notes.txt">notes</a></p>"#}),
        ),
        DocumentModel::new(
            "articles/notes.txt",
            "Resource",
            json!({"content": "see <a href=\"~/api/A.md\">A</a>"}),
        ),
        DocumentModel::new("articles/empty.md", "Conceptual", json!({})),
    ];
    let report = Transformer::new(&ctx, &ArticleRenderer, &config)
        .transform(documents)
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_path, "articles/empty.md");
    assert_eq!(report.manifest.files.len(), 3);

    assert_eq!(
        read_output(&config.output_dir, "api/A.html"),
        r#"<h1>A</h1><p>Returns <a class="xref" href="https://learn.example.com/system.string">System.String</a>.</p>"#
    );
    assert_eq!(
        read_output(&config.output_dir, "articles/intro.html"),
        concat!(
            r#"<p><a class="xref" href="../api/A.html">the A type</a>, "#,
            r#"<span class="xref">Missing.Type</span>, <a href="notes.txt">notes</a></p>"#
        )
    );
    // Non-markup outputs are written untouched.
    assert_eq!(
        read_output(&config.output_dir, "articles/notes.txt"),
        "see <a href=\"~/api/A.md\">A</a>"
    );

    let intro = report.manifest.find("articles/intro.md").unwrap();
    assert_eq!(intro.document_type, "Conceptual");
    assert_eq!(intro.metadata["unresolvedXrefs"], json!(["Missing.Type"]));
    assert_eq!(
        ctx.get_toc_membership("api/A.md").into_iter().collect::<Vec<_>>(),
        vec!["toc.yml".to_string()]
    );

    let manifest_path = dir.path().join("manifest.json");
    report.manifest.save(&manifest_path).unwrap();
    let manifest = Manifest::load(&manifest_path).unwrap();
    assert!(manifest.verify(&config.output_dir).unwrap().is_empty());

    std::fs::write(config.output_dir.join("api/A.html"), "changed").unwrap();
    let issues = manifest.verify(&config.output_dir).unwrap();
    assert!(matches!(
        issues.as_slice(),
        [VerifyIssue::HashMismatch { relative_path, .. }] if relative_path == "api/A.html"
    ));
}
