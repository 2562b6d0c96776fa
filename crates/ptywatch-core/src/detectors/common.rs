/// Get the last n bytes of a string safely, respecting UTF-8 boundaries
pub(crate) fn safe_tail(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        let start = s.len() - n;
        let start = s
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= start)
            .unwrap_or(s.len());
        &s[start..]
    }
}

/// The last `n` lines of a string
pub(crate) fn tail_lines(s: &str, n: usize) -> &str {
    let mut newlines = 0;
    for (i, b) in s.bytes().enumerate().rev() {
        if b == b'\n' && i + 1 < s.len() {
            newlines += 1;
            if newlines == n {
                return &s[i + 1..];
            }
        }
    }
    s
}

/// The trimmed line containing byte offset `pos`
pub(crate) fn line_at(s: &str, pos: usize) -> &str {
    let pos = pos.min(s.len());
    let start = s[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = s[pos..].find('\n').map(|i| pos + i).unwrap_or(s.len());
    s[start..end].trim()
}

/// Truncate text to at most `max` bytes, adding an ellipsis
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() > max {
        format!("{}...", &text[..text.floor_char_boundary(max.saturating_sub(3))])
    } else {
        text.to_string()
    }
}
