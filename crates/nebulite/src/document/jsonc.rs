//! JSONC support: comment stripping ahead of JSON parsing.

/// Strips `//` line comments and `/* */` block comments from JSONC text.
///
/// String literals are respected, including escape sequences, so comment
/// markers inside strings survive. Stripped comment characters are replaced
/// with spaces (newlines kept) so byte offsets in any later parse diagnostics
/// still line up with the original text.
#[must_use]
pub fn strip_comments(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                // copy the string literal verbatim
                let start = i;
                i += 1;
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'"' => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                out.push_str(&src[start..i.min(bytes.len())]);
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                out.push_str("  ");
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                        out.push_str("  ");
                        i += 2;
                        break;
                    }
                    out.push(if bytes[i] == b'\n' { '\n' } else { ' ' });
                    i += 1;
                }
            }
            _ => {
                let ch_len = utf8_len(bytes[i]);
                out.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    out
}

#[inline]
fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_comments() {
        let src = "{\n  \"a\": 1, // count\n  \"b\": 2\n}";
        let stripped = strip_comments(src);
        assert!(!stripped.contains("count"));
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn strips_block_comments() {
        let src = "{ /* multi\nline */ \"a\": /*inline*/ 1 }";
        let value: serde_json::Value = serde_json::from_str(&strip_comments(src)).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn preserves_markers_inside_strings() {
        let src = r#"{ "url": "http://example.com", "note": "a /* b */ c" }"#;
        let value: serde_json::Value = serde_json::from_str(&strip_comments(src)).unwrap();
        assert_eq!(value["url"], "http://example.com");
        assert_eq!(value["note"], "a /* b */ c");
    }

    #[test]
    fn plain_json_passes_through() {
        let src = r#"{"a": [1, 2, 3]}"#;
        assert_eq!(strip_comments(src), src);
    }
}
