//! Hierarchical addressing inside a colab document.
//!
//! Every container is reachable from the document root by a sequence of map
//! keys and list positions. Subscriptions compare these sequences to decide
//! whether a change event falls under a watched subtree.

use loro::Index;
use std::fmt;

/// One step of a path from the document root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Seq(usize),
    Node(String),
}

impl From<&Index> for PathSegment {
    fn from(index: &Index) -> Self {
        match index {
            Index::Key(key) => PathSegment::Key(key.to_string()),
            Index::Seq(pos) => PathSegment::Seq(*pos),
            Index::Node(node) => PathSegment::Node(node.to_string()),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(pos: usize) -> Self {
        PathSegment::Seq(pos)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Seq(pos) => write!(f, "{}", pos),
            PathSegment::Node(node) => write!(f, "{}", node),
        }
    }
}

/// Convert a Loro `(container, index)` path into plain segments.
pub fn to_segments(path: &[(loro::ContainerID, Index)]) -> Vec<PathSegment> {
    path.iter().map(|(_, index)| PathSegment::from(index)).collect()
}

/// Extend `base` with string keys.
pub fn join<I, S>(base: &[PathSegment], keys: I) -> Vec<PathSegment>
where
    I: IntoIterator<Item = S>,
    S: Into<PathSegment>,
{
    let mut out = base.to_vec();
    out.extend(keys.into_iter().map(Into::into));
    out
}

/// True when every element of `prefix` matches `path` at the same position.
/// An empty prefix matches any path; a prefix longer than the path never does.
pub fn path_starts_with<T: PartialEq>(path: &[T], prefix: &[T]) -> bool {
    if prefix.len() > path.len() {
        return false;
    }
    path.iter().zip(prefix).all(|(a, b)| a == b)
}

pub fn path_equals<T: PartialEq>(path1: &[T], path2: &[T]) -> bool {
    path1.len() == path2.len() && path_starts_with(path1, path2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(keys: &[&str]) -> Vec<PathSegment> {
        keys.iter().map(|k| PathSegment::from(*k)).collect()
    }

    #[test]
    fn starts_with_prefix() {
        assert!(path_starts_with(&p(&["a", "b", "c"]), &p(&["a", "b"])));
        assert!(path_starts_with(&p(&["a", "b"]), &p(&["a", "b"])));
        assert!(!path_starts_with(&p(&["a", "b"]), &p(&["a", "b", "c"])));
        assert!(!path_starts_with(&p(&["a", "x", "c"]), &p(&["a", "b"])));
    }

    #[test]
    fn empty_prefix_matches_everything() {
        assert!(path_starts_with(&p(&["a"]), &p(&[])));
        assert!(path_starts_with::<PathSegment>(&[], &[]));
    }

    #[test]
    fn equals_requires_same_length() {
        let a = p(&["content", "en", "acls"]);
        assert!(path_equals(&a, &a));
        assert!(!path_equals(&a, &p(&["content", "en"])));
        assert!(!path_equals(&p(&["content", "en"]), &a));
        assert!(path_equals::<PathSegment>(&[], &[]));
    }

    #[test]
    fn keys_and_positions_differ() {
        let by_key = vec![PathSegment::from("content"), PathSegment::from("0")];
        let by_pos = vec![PathSegment::from("content"), PathSegment::from(0usize)];
        assert!(!path_equals(&by_key, &by_pos));
    }

    #[test]
    fn join_appends_keys() {
        let base = vec![PathSegment::from("content"), PathSegment::Seq(2)];
        let joined = join(&base, ["rows"]);
        assert_eq!(joined.len(), 3);
        assert_eq!(joined[2], PathSegment::Key("rows".to_string()));
        assert_eq!(joined[1].to_string(), "2");
    }
}
