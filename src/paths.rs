//! Path arithmetic for working-folder keys and output-relative links.
//!
//! Links inside rendered output are always forward-slash separated, regardless of the host OS.
//! [`LinkPath`] splits a link into its file path and its `?query`/`#fragment` suffix so the two
//! can be rewritten independently.
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
    path::{Component, Path},
};
use url::Url;

/// Prefix marking a link as relative to the build's working folder (source root).
pub const WORKING_FOLDER: &str = "~/";

/// Characters escaped inside a single path segment. `/` is kept as the separator.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^')
    .add(b'[')
    .add(b']');

/// Replace separators and convert to unicode (via to_string_lossy) on an os path.
pub fn os_path_to_string<P: AsRef<Path>>(os_path_ref: P) -> String {
    os_path_ref
        .as_ref()
        .components()
        .filter_map(|c| match c {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
            _ => Some(c.as_os_str().to_string_lossy()),
        })
        .collect::<Vec<Cow<'_, str>>>()
        .join("/")
}

/// Strip the working-folder marker, returning the remainder when the marker was present.
pub fn strip_working_folder(value: &str) -> Option<&str> {
    value
        .strip_prefix(WORKING_FOLDER)
        .or_else(|| value.strip_prefix("~\\"))
}

/// Canonical form of a working-folder key: forward slashes, no marker, no leading `./` or `/`,
/// `.` and `..` resolved.
pub fn normalize_key(key: &str) -> String {
    let key = key.replace('\\', "/");
    let key = strip_working_folder(&key).unwrap_or(&key);
    LinkPath::new(key.trim_start_matches('/')).normalize()
}

/// True when `href` carries its own scheme (`https://`, `mailto:`) or is protocol-relative.
pub fn is_absolute_url(href: &str) -> bool {
    href.starts_with("//") || Url::parse(href).is_ok()
}

/// Percent-encode every segment of a forward-slash path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<String>>()
        .join("/")
}

/// A link split into `path` and `suffix`, where suffix is everything from the first `?` or `#`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPath<'a> {
    pub path: &'a str,
    suffix_sep: Option<usize>,
}

impl<'a> LinkPath<'a> {
    pub fn new(path: &'a str) -> LinkPath<'a> {
        LinkPath {
            path,
            suffix_sep: path.find(['?', '#']),
        }
    }

    pub fn filepath(&self) -> &'a str {
        &self.path[..self.suffix_sep.unwrap_or(self.path.len())]
    }

    /// `?query#fragment` portion, including its leading delimiter.
    pub fn suffix(&self) -> &'a str {
        &self.path[self.suffix_sep.unwrap_or(self.path.len())..]
    }

    pub fn fragment(&self) -> &'a str {
        self.path
            .find('#')
            .map(|idx| &self.path[idx + 1..])
            .unwrap_or("")
    }

    pub fn dir(&self) -> &'a str {
        let filepath = self.filepath();
        &filepath[..filepath.rfind('/').unwrap_or(0)]
    }

    pub fn filename(&self) -> &'a str {
        let filepath = self.filepath();
        &filepath[filepath.rfind('/').map(|idx| idx + 1).unwrap_or(0)..]
    }

    /// Resolve `.` and `..` components of the file path. Leading `..` are preserved; the suffix
    /// is dropped.
    pub fn normalize(&self) -> String {
        let mut components: Vec<&str> = Vec::new();
        let rooted = self.filepath().starts_with('/');
        for part in self.filepath().split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if components.last().is_some_and(|last| *last != "..") {
                        components.pop();
                    } else if !rooted {
                        components.push("..");
                    }
                }
                _ => components.push(part),
            }
        }
        let joined = components.join("/");
        if rooted {
            format!("/{joined}")
        } else {
            joined
        }
    }

    /// Relative path from the directory containing `self` to the file `to`. Both paths are
    /// taken as relative to the same output root.
    ///
    /// See tests module for examples.
    pub fn path_to<E: AsRef<str>>(&self, to_ref: E) -> String {
        let from = self.normalize();
        let from = from.trim_start_matches('/');
        let to = LinkPath::new(to_ref.as_ref()).normalize();
        let to = to.trim_start_matches('/');

        let from_dir = LinkPath::new(from).dir();
        let from_parts: Vec<&str> = from_dir.split('/').filter(|p| !p.is_empty()).collect();
        let to_parts: Vec<&str> = to.split('/').filter(|p| !p.is_empty()).collect();
        let Some((to_file, to_dirs)) = to_parts.split_last() else {
            return String::new();
        };

        let common_len = from_parts
            .iter()
            .zip(to_dirs.iter())
            .take_while(|(from_part, to_part)| from_part == to_part)
            .count();

        let mut result = vec![".."; from_parts.len() - common_len];
        result.extend_from_slice(&to_dirs[common_len..]);
        result.push(*to_file);
        result.join("/")
    }
}

impl<'a, T: AsRef<str> + ?Sized> From<&'a T> for LinkPath<'a> {
    fn from(s: &'a T) -> LinkPath<'a> {
        LinkPath::new(s.as_ref())
    }
}

impl Display for LinkPath<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}
