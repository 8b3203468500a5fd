//! File resolution and reference parsing.
//!
//! All engine file loads go through this module: paths resolve relative to a
//! conventional `Resources/` root (falling back to the raw path when the
//! rooted one does not exist), and document references may carry inline
//! overrides appended with `|` separators:
//!
//! ```text
//! creatures/wolf.jsonc|pos.x=120|self reload-invokes
//! ```
//!
//! Each segment after the path is either `key=value` (applied to the loaded
//! document) or a functioncall (dispatched on the loaded object's command
//! tree), applied left to right.

use std::path::{Path, PathBuf};

/// Conventional root directory for engine assets.
pub const RESOURCES_ROOT: &str = "Resources";

/// One inline override attached to a document reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefOverride {
    /// `key=value`: set `key` on the loaded document.
    KeyValue { key: String, value: String },
    /// Anything else: a command dispatched after load.
    Call(String),
}

/// A document reference split into its path and inline overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub path: String,
    pub overrides: Vec<RefOverride>,
}

/// Splits `path|key=value|functioncall` into its parts.
///
/// A segment counts as `key=value` only when the `=` appears before any
/// space, so commands with `=` inside arguments stay commands.
#[must_use]
pub fn split_ref(reference: &str) -> DocRef {
    let mut parts = reference.split('|');
    let path = parts.next().unwrap_or_default().trim().to_string();
    let overrides = parts
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.find('=') {
            Some(eq) if !segment[..eq].contains(' ') && eq > 0 => RefOverride::KeyValue {
                key: segment[..eq].trim().to_string(),
                value: segment[eq + 1..].trim().to_string(),
            },
            _ => RefOverride::Call(segment.to_string()),
        })
        .collect();
    DocRef { path, overrides }
}

/// Resolves a path against the `Resources/` root.
///
/// Absolute paths and paths that already exist are returned unchanged; a
/// relative path is preferred under `Resources/` when present there.
#[must_use]
pub fn resolve(path: &str) -> PathBuf {
    let raw = Path::new(path);
    if raw.is_absolute() || raw.exists() {
        return raw.to_path_buf();
    }
    let rooted = Path::new(RESOURCES_ROOT).join(raw);
    if rooted.exists() { rooted } else { raw.to_path_buf() }
}

/// Loads a text file through [`resolve`], logging on failure.
pub fn load_text(path: &str) -> Option<String> {
    let resolved = resolve(path);
    match std::fs::read_to_string(&resolved) {
        Ok(text) => Some(text),
        Err(err) => {
            log::warn!("could not read {}: {err}", resolved.display());
            None
        }
    }
}

/// Writes a text file, creating parent directories as needed.
pub fn write_text(path: &str, contents: &str) -> std::io::Result<()> {
    let resolved = resolve(path);
    if let Some(parent) = resolved.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(resolved, contents)
}

/// Heuristic: does this string look like inline JSON/JSONC rather than a path?
#[must_use]
pub fn looks_like_json(src: &str) -> bool {
    matches!(src.trim_start().as_bytes().first(), Some(b'{' | b'['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_path() {
        let doc_ref = split_ref("creatures/wolf.jsonc");
        assert_eq!(doc_ref.path, "creatures/wolf.jsonc");
        assert!(doc_ref.overrides.is_empty());
    }

    #[test]
    fn split_key_values_and_calls() {
        let doc_ref = split_ref("wolf.jsonc|pos.x=120|self reload-invokes");
        assert_eq!(doc_ref.path, "wolf.jsonc");
        assert_eq!(
            doc_ref.overrides,
            vec![
                RefOverride::KeyValue {
                    key: "pos.x".to_string(),
                    value: "120".to_string(),
                },
                RefOverride::Call("self reload-invokes".to_string()),
            ]
        );
    }

    #[test]
    fn equals_inside_command_args_is_a_call() {
        let doc_ref = split_ref("wolf.jsonc|self set text.str a=b");
        assert_eq!(
            doc_ref.overrides,
            vec![RefOverride::Call("self set text.str a=b".to_string())]
        );
    }

    #[test]
    fn json_detection() {
        assert!(looks_like_json("  { \"a\": 1 }"));
        assert!(!looks_like_json("creatures/wolf.jsonc"));
    }
}
