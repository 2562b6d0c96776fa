/// Columns of the scratch terminal; wide enough that captured rows never re-wrap
const RENDER_COLS: u16 = 512;
/// Upper bound for scratch terminal rows
const MAX_RENDER_ROWS: usize = 1000;

/// Render raw pane output (with escape sequences) to the plain text a human would see
///
/// Carriage returns, cursor movement and styling are interpreted by a terminal
/// emulator; OSC sequences (titles, hyperlinks) vanish. The result is
/// normalized with [`normalize`].
pub fn render_plain(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let rows = (raw.lines().count() + 1).clamp(2, MAX_RENDER_ROWS) as u16;
    let mut parser = vt100::Parser::new(rows, RENDER_COLS, 0);
    parser.process(ensure_crlf(raw).as_bytes());
    normalize(&parser.screen().contents())
}

/// Trim trailing whitespace on every line and drop trailing blank lines
///
/// Cursor blinks and resize padding otherwise change the hash without any
/// visible change.
pub fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// tmux captures end lines with a bare LF; a terminal needs CR to return to column 0
fn ensure_crlf(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 16);
    let mut prev = '\0';
    for ch in raw.chars() {
        if ch == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(ch);
        prev = ch;
    }
    out
}
