//! Dotted-path parsing for document keys.
//!
//! Keys address nodes with dots and optional bracket indices: `a.b[2].c`
//! resolves to field `c` of the third element of array `b` inside object `a`.

use crate::error::DocError;

/// One step of a parsed document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    /// Object member by name.
    Key(String),
    /// Array element by zero-based index.
    Index(usize),
}

/// Parses a dotted key into path segments.
///
/// Empty keys, empty segments (`a..b`), and malformed bracket expressions are
/// rejected; a trailing or leading dot is an empty segment.
pub fn parse_path(key: &str) -> Result<Vec<PathSeg>, DocError> {
    if key.is_empty() {
        return Err(DocError::InvalidKey(key.to_string()));
    }
    let mut segments = Vec::new();
    for part in key.split('.') {
        if part.is_empty() {
            return Err(DocError::InvalidKey(key.to_string()));
        }
        let mut rest = part;
        // name before any bracket
        if let Some(bracket) = rest.find('[') {
            let name = &rest[..bracket];
            if name.is_empty() {
                // `[0]` with no preceding name is only valid mid-path after
                // another bracket, which the loop below handles; a bare
                // leading index is not addressable from a root object.
                return Err(DocError::InvalidKey(key.to_string()));
            }
            segments.push(PathSeg::Key(name.to_string()));
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    return Err(DocError::BadIndex(key.to_string()));
                };
                let index: usize = stripped[..close]
                    .parse()
                    .map_err(|_| DocError::BadIndex(key.to_string()))?;
                segments.push(PathSeg::Index(index));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(DocError::BadIndex(key.to_string()));
            }
        } else {
            segments.push(PathSeg::Key(rest.to_string()));
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> PathSeg {
        PathSeg::Key(name.to_string())
    }

    #[test]
    fn plain_dotted_path() {
        assert_eq!(
            parse_path("a.b.c").unwrap(),
            vec![key("a"), key("b"), key("c")]
        );
    }

    #[test]
    fn bracket_indices() {
        assert_eq!(
            parse_path("a.b[2].c").unwrap(),
            vec![key("a"), key("b"), PathSeg::Index(2), key("c")]
        );
        assert_eq!(
            parse_path("m[0][1]").unwrap(),
            vec![key("m"), PathSeg::Index(0), PathSeg::Index(1)]
        );
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a.").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
        assert!(parse_path("a[1]b").is_err());
        assert!(parse_path("[0]").is_err());
    }
}
