//! Canonicalization of raw diagram source.
//!
//! The canonical form is what gets encoded into share tokens and handed to
//! the render engine, so it must be deterministic: the same pasted snippet
//! always produces the same token. Users paste diagrams with leading
//! comment headers and surrounding markdown code fences; both are stripped.

/// Normalize raw diagram markup into its canonical form.
///
/// Strips leading blank and `#`-comment lines, one surrounding fenced-code
/// block (```` ```mermaid ```` or a bare fence), trailing blank lines, and
/// outer whitespace. Idempotent: applying it to an already-canonical string
/// is a no-op. Empty input yields the empty string.
pub fn canonicalize(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let next = strip_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// One stripping pass. Repeated until a fixpoint so that pathological
/// inputs (nested fences) cannot defeat idempotence.
fn strip_pass(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut start = 0;
    let mut end = lines.len();

    while start < end {
        let line = lines[start].trim();
        if line.is_empty() || line.starts_with('#') {
            start += 1;
        } else {
            break;
        }
    }

    if start < end && is_fence_opener(lines[start]) {
        start += 1;
    }

    while end > start {
        let line = lines[end - 1].trim();
        if line.is_empty() || line == "```" {
            end -= 1;
        } else {
            break;
        }
    }

    lines[start..end].join("\n").trim().to_string()
}

/// A fence opener is three backticks followed by an optional `mermaid`
/// language tag, case-insensitive, with whitespace tolerated around it.
fn is_fence_opener(line: &str) -> bool {
    match line.trim().strip_prefix("```") {
        Some(rest) => {
            let tag = rest.trim();
            tag.is_empty() || tag.eq_ignore_ascii_case("mermaid")
        }
        None => false,
    }
}
