//! Helpers for putting radio data into log lines.
//!
//! Mesh text, device console output and plugin messages are untrusted and often multi-line;
//! [`escape_log`] keeps each log record on one line. [`hex_snippet`] previews raw frames.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex preview of at most `max` bytes, with a trailing marker when cut short.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(data.len().min(max) * 2 + 4);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push_str("..");
    }
    out
}
