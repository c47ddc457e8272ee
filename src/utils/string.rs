/// Largest char boundary at or before `max_bytes`.
#[inline]
fn char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    (0..=max_bytes).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Truncate to `max_len` bytes (UTF-8 safe), appending a marker when cut.
#[inline]
pub fn truncate_with_marker(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...[truncated]", &s[..char_boundary(s, max_len)])
    }
}

/// Truncate to `max_chars` characters with a `...` suffix.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

/// Collapse a multi-line message onto one line for logs and tables.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
