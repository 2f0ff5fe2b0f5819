//! TAP 13 encoding of assertion results.
//!
//! ```text
//! not ok 2 should be equal
//!   ---
//!     operator: equal
//!     expected: 100
//!     actual: 1
//!   ...
//! ```

use crate::result::{AssertionResult, Operator};

/// The first line of every stream.
pub const VERSION_LINE: &str = "TAP version 13";

/// Values longer than this many characters, or spanning several lines, are
/// rendered as YAML block literals.
pub const INLINE_LIMIT: usize = 65;

const OUTER: &str = "  ";
const INNER: &str = "    ";

/// Render one result as TAP text, terminated by a newline.
///
/// `count` is the stream-wide sequence number. Comment results ignore it.
pub fn encode(result: &AssertionResult, count: usize) -> String {
    if let Some(comment) = result.comment.as_deref() {
        return encode_comment(comment);
    }

    let mut out = String::new();
    out.push_str(if result.ok { "ok " } else { "not ok " });
    out.push_str(&count.to_string());
    if !result.name.is_empty() {
        out.push(' ');
        out.push_str(&result.name);
    }
    if result.skip {
        out.push_str(" # SKIP");
    } else if result.todo {
        out.push_str(" # TODO");
    }
    out.push('\n');

    if result.ok {
        return out;
    }

    out.push_str(OUTER);
    out.push_str("---\n");
    out.push_str(&format!("{INNER}operator: {}\n", result.operator));

    let expected = result
        .expected
        .as_deref()
        .or(result.not_expected.as_deref())
        .unwrap_or("");
    let actual = result.actual.as_deref().unwrap_or("");
    if !expected.is_empty() || !actual.is_empty() {
        push_pair(&mut out, expected, actual);
    }

    if result.operator == Operator::Error {
        if let Some(err) = &result.error {
            out.push_str(&format!("{INNER}exception: |-\n"));
            push_block(&mut out, &err.message);
        }
    }

    out.push_str(OUTER);
    out.push_str("...\n");
    out
}

/// Render free text as `# ` lines.
pub fn encode_comment(text: &str) -> String {
    text.lines().map(|line| format!("# {line}\n")).collect()
}

/// Render the diagnostic block for a plan/count mismatch.
pub fn encode_plan_mismatch(count: usize, expected: usize, actual: usize) -> String {
    let mut out = format!("not ok {count} plan != count\n");
    out.push_str(OUTER);
    out.push_str("---\n");
    out.push_str(&format!("{INNER}operator: {}\n", Operator::Fail));
    push_pair(&mut out, &expected.to_string(), &actual.to_string());
    out.push_str(OUTER);
    out.push_str("...\n");
    out
}

fn push_pair(out: &mut String, expected: &str, actual: &str) {
    if needs_block(expected) || needs_block(actual) {
        out.push_str(&format!("{INNER}expected: |-\n"));
        push_block(out, expected);
        out.push_str(&format!("{INNER}actual: |-\n"));
        push_block(out, actual);
    } else {
        out.push_str(&format!("{INNER}expected: {expected}\n"));
        out.push_str(&format!("{INNER}actual: {actual}\n"));
    }
}

fn needs_block(value: &str) -> bool {
    value.contains('\n') || value.chars().count() > INLINE_LIMIT
}

fn push_block(out: &mut String, value: &str) {
    if value.is_empty() {
        out.push_str(&format!("{INNER}  \n"));
        return;
    }
    for line in value.lines() {
        out.push_str(&format!("{INNER}  {line}\n"));
    }
}
