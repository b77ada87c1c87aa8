//! Post-render link rewriting for markup outputs.
//!
//! Two authoring forms reach this stage and are converged into one [`XrefNode`]:
//!
//! ```html
//! <xref uid="System.String" displayProperty="fullName" data-throw-if-not-resolved="true"/>
//! <a href="xref:System.String?displayProperty=fullName#remarks">optional content</a>
//! ```
//!
//! The anchor form must resolve; the element form only must when it says so. Resolved nodes
//! become `<a class="xref">` links, unresolved ones a `<span class="xref">` carrying the best
//! text available. Separately, every `src`/`href` attribute starting with the working-folder
//! marker (`~/`) is rewritten relative to the document's own output path.
//!
//! The markup is streamed through `quick_xml` in a lenient, HTML-tolerant configuration and
//! written straight into the caller's sink.
use percent_encoding::percent_decode_str;
use quick_xml::{
    escape::unescape,
    events::{attributes::Attribute, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::{collections::BTreeSet, io::Write};

use crate::{
    context::BuildContext,
    error::BuildError,
    paths::{encode_path, is_absolute_url, normalize_key, strip_working_folder, LinkPath},
    xref::{spec::FULL_NAME, XRefSpec},
};

pub const XREF_SCHEME: &str = "xref:";
const XREF_TAG: &[u8] = b"xref";
const ANCHOR_TAG: &[u8] = b"a";
const STRICT_ATTR: &[u8] = b"data-throw-if-not-resolved";

/// The result of resolving one cross-reference node.
#[derive(Debug, Clone, PartialEq)]
pub enum XrefOutcome {
    Resolved(XRefSpec),
    UnresolvedTolerated(String),
    UnresolvedStrict(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteReport {
    pub xrefs: Vec<XrefOutcome>,
    /// Working-folder keys that had no output mapping.
    pub unmapped_links: Vec<String>,
}

impl RewriteReport {
    /// Distinct uids that were required to resolve and did not.
    pub fn unresolved_strict(&self) -> BTreeSet<&str> {
        self.xrefs
            .iter()
            .filter_map(|outcome| match outcome {
                XrefOutcome::UnresolvedStrict(uid) => Some(uid.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.xrefs
            .iter()
            .filter(|outcome| matches!(outcome, XrefOutcome::Resolved(_)))
            .count()
    }
}

/// The canonical form of a cross-reference, whichever syntax it was authored in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrefNode {
    pub uid: String,
    pub fragment: Option<String>,
    pub display_property: Option<String>,
    pub text: Option<String>,
    /// Authored in must-resolve form.
    pub strict: bool,
}

impl XrefNode {
    /// Parse `UID?displayProperty=P&text=T#fragment`. The uid is percent-decoded.
    pub fn parse(target: &str, strict: bool) -> Option<XrefNode> {
        let (target, fragment) = match target.split_once('#') {
            Some((target, fragment)) => (target, Some(fragment.to_string())),
            None => (target, None),
        };
        let (uid, query) = target.split_once('?').unwrap_or((target, ""));
        let uid = percent_decode_str(uid).decode_utf8_lossy().trim().to_string();
        if uid.is_empty() {
            return None;
        }
        let mut node = XrefNode {
            uid,
            fragment: fragment.filter(|f| !f.is_empty()),
            strict,
            ..Default::default()
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "displayProperty" => node.display_property = Some(value.into_owned()),
                "text" => node.text = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(node)
    }

    /// Recognize either authoring form from a start (or empty) tag.
    pub fn from_start(e: &BytesStart<'_>) -> Option<XrefNode> {
        let name = e.name();
        let name = name.as_ref();
        if name.eq_ignore_ascii_case(ANCHOR_TAG) {
            return e
                .html_attributes()
                .flatten()
                .filter(|attr| attr.key.as_ref().eq_ignore_ascii_case(b"href"))
                .map(|attr| attribute_value(&attr))
                .find_map(|href| {
                    let scheme = href.get(..XREF_SCHEME.len())?;
                    if !scheme.eq_ignore_ascii_case(XREF_SCHEME) {
                        return None;
                    }
                    XrefNode::parse(&href[XREF_SCHEME.len()..], true)
                });
        }
        if !name.eq_ignore_ascii_case(XREF_TAG) {
            return None;
        }

        let mut target = None;
        let mut strict = false;
        let mut display_property = None;
        let mut text = None;
        for attr in e.html_attributes().flatten() {
            let key = attr.key.as_ref();
            let value = attribute_value(&attr);
            if key.eq_ignore_ascii_case(b"uid") {
                target = Some(value);
            } else if key.eq_ignore_ascii_case(b"href") {
                let value = value
                    .strip_prefix(XREF_SCHEME)
                    .map(str::to_string)
                    .unwrap_or(value);
                target.get_or_insert(value);
            } else if key.eq_ignore_ascii_case(STRICT_ATTR) {
                strict = value.eq_ignore_ascii_case("true");
            } else if key.eq_ignore_ascii_case(b"displayProperty") {
                display_property = Some(value);
            } else if key.eq_ignore_ascii_case(b"text") || key.eq_ignore_ascii_case(b"alt") {
                text.get_or_insert(value);
            }
        }
        let mut node = XrefNode::parse(&target?, strict)?;
        if display_property.is_some() {
            node.display_property = display_property;
        }
        if text.is_some() {
            node.text = text;
        }
        Some(node)
    }
}

/// Unescaped attribute value. Values with entities quick_xml does not know are kept raw.
fn attribute_value(attr: &Attribute<'_>) -> String {
    let raw = String::from_utf8_lossy(&attr.value);
    match unescape(&raw) {
        Ok(value) => value.into_owned(),
        Err(_) => raw.into_owned(),
    }
}

/// An xref element whose content is still being read.
struct Capture {
    node: XrefNode,
    tag: Vec<u8>,
    /// Elements opened inside the content, lowercased. Void elements written without a
    /// closing slash stay here, which only matters when a later end tag matches them.
    open: Vec<Vec<u8>>,
    inner: Writer<Vec<u8>>,
}

impl Capture {
    fn is_tag(&self, name: &[u8]) -> bool {
        name.eq_ignore_ascii_case(&self.tag)
    }

    /// Index of the innermost open element named `name`.
    fn open_position(&self, name: &[u8]) -> Option<usize> {
        self.open
            .iter()
            .rposition(|open| open.as_slice().eq_ignore_ascii_case(name))
    }
}

pub struct LinkRewriter<'a> {
    context: &'a BuildContext,
    language: String,
}

impl<'a> LinkRewriter<'a> {
    pub fn new<S: Into<String>>(context: &'a BuildContext, language: S) -> Self {
        LinkRewriter {
            context,
            language: language.into(),
        }
    }

    pub fn rewrite_to_string(
        &self,
        markup: &str,
        output_path: &str,
    ) -> Result<(String, RewriteReport), BuildError> {
        let (bytes, report) = self.rewrite(markup, output_path, Vec::new())?;
        Ok((String::from_utf8_lossy(&bytes).into_owned(), report))
    }

    /// Rewrite `markup`, the rendered content of the output at `output_path` (relative to the
    /// output root), into `sink`.
    #[tracing::instrument(skip(self, markup, sink))]
    pub fn rewrite<W: Write>(
        &self,
        markup: &str,
        output_path: &str,
        sink: W,
    ) -> Result<(W, RewriteReport), BuildError> {
        let mut reader = Reader::from_str(markup);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_dangling_amp = true;
        config.trim_text(false);

        let mut writer = Writer::new(sink);
        let mut report = RewriteReport::default();
        let mut capture: Option<Capture> = None;
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) => {
                    if let Some(cap) = capture.as_mut() {
                        cap.open.push(e.name().as_ref().to_ascii_lowercase());
                        let e = self.rewrite_attributes(e, output_path, &mut report);
                        cap.inner.write_event(Event::Start(e))?;
                    } else if let Some(node) = XrefNode::from_start(&e) {
                        capture = Some(Capture {
                            node,
                            tag: e.name().as_ref().to_vec(),
                            open: Vec::new(),
                            inner: Writer::new(Vec::new()),
                        });
                    } else {
                        let e = self.rewrite_attributes(e, output_path, &mut report);
                        writer.write_event(Event::Start(e))?;
                    }
                }
                Event::Empty(e) => {
                    if let Some(cap) = capture.as_mut() {
                        let e = self.rewrite_attributes(e, output_path, &mut report);
                        cap.inner.write_event(Event::Empty(e))?;
                    } else if let Some(node) = XrefNode::from_start(&e) {
                        self.emit_xref(&mut writer, node, &[], output_path, &mut report)?;
                    } else {
                        let e = self.rewrite_attributes(e, output_path, &mut report);
                        writer.write_event(Event::Empty(e))?;
                    }
                }
                Event::End(e) => {
                    let Some(cap) = capture.as_mut() else {
                        writer.write_event(Event::End(e))?;
                        continue;
                    };
                    if let Some(idx) = cap.open_position(e.name().as_ref()) {
                        cap.open.truncate(idx);
                        cap.inner.write_event(Event::End(e))?;
                        continue;
                    }
                    // Either the xref's own end tag, or an enclosing element closing over an
                    // xref that was never closed: the content ends here.
                    let closes_parent = !cap.is_tag(e.name().as_ref());
                    if let Some(done) = capture.take() {
                        let inner = done.inner.into_inner();
                        self.emit_xref(&mut writer, done.node, &inner, output_path, &mut report)?;
                    }
                    if closes_parent {
                        writer.write_event(Event::End(e))?;
                    }
                }
                other => match capture.as_mut() {
                    Some(cap) => cap.inner.write_event(other)?,
                    None => writer.write_event(other)?,
                },
            }
        }
        // Unclosed at end of input: whatever was read counts as content.
        if let Some(done) = capture.take() {
            let inner = done.inner.into_inner();
            self.emit_xref(&mut writer, done.node, &inner, output_path, &mut report)?;
        }

        let strict = report.unresolved_strict();
        if !strict.is_empty() {
            tracing::warn!(
                "{}: {} cross reference(s) could not be resolved: {}",
                output_path,
                strict.len(),
                strict.into_iter().collect::<Vec<_>>().join(", ")
            );
        }
        Ok((writer.into_inner(), report))
    }

    /// Rewrite working-folder `src`/`href` attributes. Tags without any are returned as is.
    fn rewrite_attributes<'x>(
        &self,
        e: BytesStart<'x>,
        output_path: &str,
        report: &mut RewriteReport,
    ) -> BytesStart<'x> {
        let mut changes = Vec::new();
        for (idx, attr) in e.html_attributes().flatten().enumerate() {
            let key = attr.key.as_ref();
            if !key.eq_ignore_ascii_case(b"src") && !key.eq_ignore_ascii_case(b"href") {
                continue;
            }
            let value = attribute_value(&attr);
            if let Some(local) = strip_working_folder(&value) {
                changes.push((idx, self.rewrite_local_link(local, output_path, report)));
            }
        }
        if changes.is_empty() {
            return e;
        }

        let mut rewritten = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        let mut changes = changes.into_iter().peekable();
        for (idx, attr) in e.html_attributes().flatten().enumerate() {
            match changes.next_if(|(change_idx, _)| *change_idx == idx) {
                Some((_, value)) => {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    rewritten.push_attribute((key.as_str(), value.as_str()));
                }
                None => rewritten.push_attribute(attr),
            }
        }
        rewritten
    }

    /// `local` is a working-folder link with the marker already stripped.
    fn rewrite_local_link(
        &self,
        local: &str,
        output_path: &str,
        report: &mut RewriteReport,
    ) -> String {
        let link = LinkPath::new(local);
        let key = normalize_key(link.filepath());
        match self.context.get_output_path(&key) {
            Some(target) => format!(
                "{}{}",
                encode_path(&LinkPath::new(output_path).path_to(&target)),
                link.suffix()
            ),
            None => {
                tracing::warn!(
                    "{}: no output file is mapped for '{}{}'; leaving the link unrewritten",
                    output_path,
                    crate::paths::WORKING_FOLDER,
                    local
                );
                report.unmapped_links.push(key);
                format!("{}{}", link.filepath(), link.suffix())
            }
        }
    }

    /// Link target of a resolved spec as seen from `output_path`.
    fn xref_href(&self, spec: &XRefSpec, fragment: Option<&str>, output_path: &str) -> Option<String> {
        let href = spec.href()?;
        let href = if is_absolute_url(href) {
            href.to_string()
        } else {
            let link = LinkPath::new(href);
            let key = normalize_key(link.filepath());
            let target = self.context.get_output_path(&key).unwrap_or(key);
            format!(
                "{}{}",
                encode_path(&LinkPath::new(output_path).path_to(&target)),
                link.suffix()
            )
        };
        Some(match fragment {
            Some(fragment) => {
                let base = href.find('#').map(|idx| &href[..idx]).unwrap_or(&href);
                format!("{base}#{fragment}")
            }
            None => href,
        })
    }

    fn emit_xref<W: Write>(
        &self,
        writer: &mut Writer<W>,
        node: XrefNode,
        inner: &[u8],
        output_path: &str,
        report: &mut RewriteReport,
    ) -> Result<(), BuildError> {
        let has_inner = inner.iter().any(|b| !b.is_ascii_whitespace());
        let spec = self.context.get_xref_spec(&node.uid);

        let (tag, display) = match spec.as_ref() {
            Some(spec) => {
                let display = node.text.clone().unwrap_or_else(|| {
                    spec.display_text(
                        node.display_property.as_deref().unwrap_or("name"),
                        &self.language,
                    )
                    .to_string()
                });
                match self.xref_href(spec, node.fragment.as_deref(), output_path) {
                    Some(href) => {
                        let mut start = BytesStart::new("a");
                        start.push_attribute(("class", "xref"));
                        start.push_attribute(("href", href.as_str()));
                        let tooltip = spec.display_text(FULL_NAME, &self.language);
                        if tooltip != display {
                            start.push_attribute(("title", tooltip));
                        }
                        writer.write_event(Event::Start(start))?;
                        ("a", display)
                    }
                    None => {
                        tracing::debug!("Uid '{}' resolved without an href", node.uid);
                        let mut start = BytesStart::new("span");
                        start.push_attribute(("class", "xref"));
                        writer.write_event(Event::Start(start))?;
                        ("span", display)
                    }
                }
            }
            None => {
                let mut start = BytesStart::new("span");
                start.push_attribute(("class", "xref"));
                writer.write_event(Event::Start(start))?;
                ("span", node.text.clone().unwrap_or_else(|| node.uid.clone()))
            }
        };

        if node.text.is_none() && has_inner {
            writer.get_mut().write_all(inner)?;
        } else {
            writer.write_event(Event::Text(BytesText::new(&display)))?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;

        report.xrefs.push(match spec {
            Some(spec) => XrefOutcome::Resolved(spec),
            None if node.strict => XrefOutcome::UnresolvedStrict(node.uid),
            None => {
                tracing::debug!("{}: tolerated unresolved uid '{}'", output_path, node.uid);
                XrefOutcome::UnresolvedTolerated(node.uid)
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn context() -> BuildContext {
        let ctx = BuildContext::new(
            Default::default(),
            crate::xref::XRefResolver::new(
                vec![crate::xref::XRefCatalog::new(
                    "catalog",
                    false,
                    vec![XRefSpec::new("System.String")
                        .with_name("String")
                        .with_href("https://learn.example.com/system.string")
                        .with_meta(FULL_NAME, "System.String")],
                )],
                None,
            ),
        );
        ctx.set_output_path("a.md", "api/a.html");
        ctx.set_output_path("api/A.md", "api/A.html");
        ctx.register_internal_xref(XRefSpec::new("A").with_name("A").with_href("api/A.md"))
            .unwrap();
        ctx
    }

    #[test]
    fn test_working_folder_links() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, report) = rewriter
            .rewrite_to_string(
                r#"<p><a href="~/a.md#frag">A</a> <a href="~/c.md#top">C</a> <a href="https://example.com/x">X</a></p>"#,
                "articles/b.html",
            )
            .unwrap();
        assert_eq!(
            html,
            r#"<p><a href="../api/a.html#frag">A</a> <a href="c.md#top">C</a> <a href="https://example.com/x">X</a></p>"#
        );
        assert_eq!(report.unmapped_links, vec!["c.md".to_string()]);
        assert!(report.xrefs.is_empty());
    }

    #[test]
    fn test_src_attributes_keep_other_attributes() {
        let ctx = context();
        ctx.set_output_path("images/my logo.png", "images/my logo.png");
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, _) = rewriter
            .rewrite_to_string(
                r#"<img alt="logo" src="~/images/my logo.png" class="wide"/>"#,
                "articles/b.html",
            )
            .unwrap();
        assert_eq!(
            html,
            r#"<img alt="logo" src="../images/my%20logo.png" class="wide"/>"#
        );
    }

    #[test]
    fn test_xref_forms_resolve() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, report) = rewriter
            .rewrite_to_string(
                concat!(
                    r#"<p><xref uid="A"/> and "#,
                    r#"<a href="xref:System.String?displayProperty=fullName#remarks"></a> and "#,
                    r#"<xref uid="Missing"/> and <a href="xref:Gone">gone</a></p>"#
                ),
                "articles/b.html",
            )
            .unwrap();
        assert_eq!(
            html,
            concat!(
                r#"<p><a class="xref" href="../api/A.html">A</a> and "#,
                r#"<a class="xref" href="https://learn.example.com/system.string#remarks">System.String</a> and "#,
                r#"<span class="xref">Missing</span> and <span class="xref">gone</span></p>"#
            )
        );
        assert_eq!(report.resolved_count(), 2);
        assert_eq!(
            report.xrefs[2..],
            [
                XrefOutcome::UnresolvedTolerated("Missing".to_string()),
                XrefOutcome::UnresolvedStrict("Gone".to_string()),
            ]
        );
        assert_eq!(report.unresolved_strict().into_iter().collect::<Vec<_>>(), vec!["Gone"]);
    }

    #[test]
    fn test_inner_content_and_tooltip() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, _) = rewriter
            .rewrite_to_string(
                r#"<xref uid="A">the <b>A</b> type</xref> <xref uid="System.String"/>"#,
                "api/index.html",
            )
            .unwrap();
        assert_eq!(
            html,
            concat!(
                r#"<a class="xref" href="A.html">the <b>A</b> type</a> "#,
                r#"<a class="xref" href="https://learn.example.com/system.string" title="System.String">String</a>"#
            )
        );
    }

    #[test]
    fn test_html_text_passes_through() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, _) = rewriter
            .rewrite_to_string(
                r#"<p>Tom & Jerry &nbsp;<a href="~/a.md">a</a></p><script>if (a < b && c) { go(); }</script>"#,
                "articles/b.html",
            )
            .unwrap();
        assert_eq!(
            html,
            r#"<p>Tom & Jerry &nbsp;<a href="../api/a.html">a</a></p><script>if (a < b && c) { go(); }</script>"#
        );
    }

    #[test]
    fn test_unclosed_xref_ends_with_its_parent() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        let (html, report) = rewriter
            .rewrite_to_string(
                r#"<p><xref uid="A"></p>after <div><xref uid="A">the <b>A</b> type</div>"#,
                "articles/b.html",
            )
            .unwrap();
        assert_eq!(
            html,
            concat!(
                r#"<p><a class="xref" href="../api/A.html">A</a></p>after "#,
                r#"<div><a class="xref" href="../api/A.html">the <b>A</b> type</a></div>"#
            )
        );
        assert_eq!(report.resolved_count(), 2);
    }

    #[test]
    fn test_both_forms_converge() {
        let anchor = BytesStart::from_content(r#"a href="xref:Foo%20Bar?text=Foo#x""#, 1);
        let element = BytesStart::from_content(
            r#"xref uid="Foo Bar#x" text="Foo" data-throw-if-not-resolved="True""#,
            4,
        );
        let from_anchor = XrefNode::from_start(&anchor).unwrap();
        assert_eq!(from_anchor, XrefNode::from_start(&element).unwrap());
        assert_eq!(from_anchor.uid, "Foo Bar");
        assert_eq!(from_anchor.fragment.as_deref(), Some("x"));
        assert!(from_anchor.strict);

        let plain = BytesStart::from_content(r#"a href="https://example.com""#, 1);
        assert!(XrefNode::from_start(&plain).is_none());
        assert!(XrefNode::parse("?text=x", false).is_none());
    }

    #[test]
    fn test_unresolved_lookups_are_memoized_across_documents() {
        let ctx = context();
        let rewriter = LinkRewriter::new(&ctx, "csharp");
        for output in ["one.html", "two.html"] {
            rewriter
                .rewrite_to_string(r#"<a href="xref:Gone"></a>"#, output)
                .unwrap();
        }
        let stats = ctx.resolver().stats();
        assert_eq!(stats.catalog_queries, 1);
        assert_eq!(stats.unknown_hits, 1);
    }
}
