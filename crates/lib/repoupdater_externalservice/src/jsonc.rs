//! Comment-aware scanning over a JSON-with-comments (JSONC) source text.
//!
//! Nothing in this workspace's dependency stack does format-preserving JSONC
//! editing, so `Exclude`/`IncludeRepos` (spec.md §4.A) need a small
//! hand-rolled scanner: strip comments before handing text to `serde_json`,
//! and locate the span of a named top-level array without disturbing
//! anything outside it when splicing in new elements.

/// Replaces every `//line` and `/* block */` comment with spaces (preserving
/// byte offsets and line numbers, so error positions reported by
/// `serde_json` against the stripped text still point at the same place in
/// the original). Comments inside string literals are left alone.
pub fn strip_comments(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out: Vec<u8> = bytes.to_vec();
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out[i] = b' ';
                out[i + 1] = b' ';
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    if bytes[i] != b'\n' {
                        out[i] = b' ';
                    }
                    i += 1;
                }
                if i < bytes.len() {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    i += 2;
                }
            }
            _ => i += 1,
        }
    }

    String::from_utf8(out).expect("replacing comment bytes with spaces preserves UTF-8 validity")
}

/// The half-open byte range `[open, close)` of a top-level JSON array's
/// *contents*, i.e. the span between the `[` and the matching `]`
/// (exclusive of both brackets), found by locating `"key":` at the object's
/// top nesting level and skipping to the array that follows it.
///
/// Returns `None` if the key is absent or isn't followed by an array.
/// Operates on `commentless`, the output of [`strip_comments`] run on the
/// same source `commentless` was derived from, so byte offsets line up with
/// the original text.
pub fn find_top_level_array(commentless: &str, key: &str) -> Option<(usize, usize)> {
    let bytes = commentless.as_bytes();
    let needle = format!("\"{key}\"");
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => {
                if depth == 1 && commentless[i..].starts_with(&needle) {
                    let after_key = i + needle.len();
                    let colon = commentless[after_key..].find(':')? + after_key + 1;
                    let bracket = colon + commentless[colon..].find('[')?;
                    let close = matching_bracket(commentless, bracket)?;
                    return Some((bracket + 1, close));
                }
                in_string = true;
                i += 1;
            }
            b'{' | b'[' => {
                depth += 1;
                i += 1;
            }
            b'}' | b']' => {
                depth -= 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Finds the index of the `]` matching the `[` at `open`, skipping over
/// nested brackets and string literals.
fn matching_bracket(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'[' | b'{' => depth += 1,
                b']' | b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_line_and_block_comments_keeping_offsets() {
        let src = "{\n  // a comment\n  \"a\": 1, /* inline */ \"b\": 2\n}";
        let stripped = strip_comments(src);
        assert_eq!(stripped.len(), src.len());
        let parsed: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn leaves_comment_like_text_in_strings_alone() {
        let src = r#"{"url": "https://example.com"}"#;
        assert_eq!(strip_comments(src), src);
    }

    #[test]
    fn finds_top_level_array_span() {
        let src = r#"{"exclude": ["a", "b"], "other": {"exclude": ["nope"]}}"#;
        let (open, close) = find_top_level_array(src, "exclude").unwrap();
        assert_eq!(&src[open..close], r#""a", "b""#);
    }

    #[test]
    fn missing_key_returns_none() {
        let src = r#"{"repos": []}"#;
        assert!(find_top_level_array(src, "exclude").is_none());
    }

    #[test]
    fn ignores_nested_key_of_the_same_name() {
        let src = r#"{"repos": [], "nested": {"repos": ["decoy"]}}"#;
        let (open, close) = find_top_level_array(src, "repos").unwrap();
        assert_eq!(&src[open..close], "");
    }
}
