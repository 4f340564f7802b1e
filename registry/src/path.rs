//! Canonical registry paths.
//!
//! A canonical path is its `/`-separated segments joined with a single `/`,
//! with no leading, trailing or repeated separators. Every driver operation
//! canonicalises its input, so `"/a//b/"` and `"a/b"` name the same node.

/// Join path fragments into one canonical path.
///
/// Each fragment may itself contain separators. Empty segments are dropped.
/// A trailing non-separator suffix is preserved, which is what sequential
/// prefixes such as `"servers/node_"` rely on.
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for part in parts {
        for segment in part.as_ref().split('/').filter(|s| !s.is_empty()) {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(segment);
        }
    }
    out
}

/// Canonical form of a single path.
pub fn canonical(path: &str) -> String {
    join([path])
}

/// Parent of a canonical path, `None` for a root-level node.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Last segment of a canonical path.
pub fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Immediate child segment of `path` under `ancestor`, if `path` lies below it.
pub(crate) fn child_segment<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
    let rest = if ancestor.is_empty() {
        path
    } else {
        path.strip_prefix(ancestor)?.strip_prefix('/')?
    };
    rest.split('/').next().filter(|s| !s.is_empty())
}
