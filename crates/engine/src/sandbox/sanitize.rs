/// Language tags recognised directly after an opening fence.
const LANGUAGE_TAGS: &[&str] = &["python3", "python", "py", "json"];

fn is_fence_char(c: char) -> bool {
    c == '`' || c.is_whitespace()
}

/// One pass over the head of `text`: drop a run of whitespace/backticks and,
/// when that run contained a backtick, a language tag right after it.
fn strip_head_once(text: &str) -> &str {
    let rest = text.trim_start_matches(is_fence_char);
    let consumed = &text[..text.len() - rest.len()];
    if !consumed.contains('`') {
        return rest;
    }

    for tag in LANGUAGE_TAGS {
        let Some(head) = rest.get(..tag.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(tag) {
            continue;
        }
        let after = &rest[tag.len()..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            return after;
        }
    }

    rest
}

/// Strip incidental formatting from model-generated code.
///
/// Removes a leading run of whitespace/backticks (plus a language tag following
/// an opening fence, case-insensitive) and a trailing run of whitespace/backticks.
/// `sanitize(sanitize(x)) == sanitize(x)` for every input.
pub fn sanitize(text: &str) -> String {
    let mut current = text;
    loop {
        let next = strip_head_once(current);
        if next.len() == current.len() {
            break;
        }
        current = next;
    }

    current.trim_end_matches(is_fence_char).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_python_fence() {
        assert_eq!(sanitize("```python\nprint(1)\n```"), "print(1)");
    }

    #[test]
    fn test_tag_is_case_insensitive() {
        assert_eq!(sanitize("```PyThOn\nx = 1\nprint(x)\n```\n"), "x = 1\nprint(x)");
        assert_eq!(sanitize("```JSON\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_plain_code_untouched_apart_from_edges() {
        assert_eq!(sanitize("  print(2+2)  \n"), "print(2+2)");
        assert_eq!(sanitize("print(2+2)"), "print(2+2)");
    }

    #[test]
    fn test_identifier_starting_with_tag_is_kept() {
        // No fence, so "python_total" is code, not a tag.
        assert_eq!(sanitize("python_total = 3"), "python_total = 3");
        // After a fence, a tag must be a whole word.
        assert_eq!(sanitize("```\npython_total = 3\n```"), "python_total = 3");
    }

    #[test]
    fn test_inner_backticks_preserved() {
        assert_eq!(
            sanitize("```py\ns = \"`quoted`\"\nprint(s)\n```"),
            "s = \"`quoted`\"\nprint(s)"
        );
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("```"), "");
        assert_eq!(sanitize("``` python ```"), "");
        assert_eq!(sanitize("\n\t  "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "```python\nprint(1)\n```",
            "```python\n```python\nprint(1)\n```\n```",
            "``` py\nprint('py')```",
            "pythonpython",
            "```pythonpython\n```",
            "   `print(1)`   ",
            "```python3\nimport_count = 0\n```",
            "",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", sample);
        }
    }
}
