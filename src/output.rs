//! Terminal output formatting for the status readers

use chrono::{DateTime, Local, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use ptywatch_core::SessionState;

/// Whether color output is enabled (TTY + NO_COLOR not set)
fn use_color() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// ANSI color codes container (empty strings when color is disabled)
pub struct Colors {
    pub bold: &'static str,
    pub dim: &'static str,
    pub reset: &'static str,
    green: &'static str,
    yellow: &'static str,
    red: &'static str,
    cyan: &'static str,
}

impl Colors {
    pub fn new() -> Self {
        if use_color() {
            Self::ansi()
        } else {
            Self::plain()
        }
    }

    fn ansi() -> Self {
        Self {
            bold: "\x1b[1m",
            dim: "\x1b[2m",
            reset: "\x1b[0m",
            green: "\x1b[32m",
            yellow: "\x1b[33m",
            red: "\x1b[31m",
            cyan: "\x1b[36m",
        }
    }

    pub fn plain() -> Self {
        Self {
            bold: "",
            dim: "",
            reset: "",
            green: "",
            yellow: "",
            red: "",
            cyan: "",
        }
    }

    /// Get color for a session state
    pub fn state(&self, state: SessionState) -> &'static str {
        match state {
            SessionState::Ready => self.green,
            SessionState::Busy => self.cyan,
            SessionState::NeedsConfirmation => self.yellow,
            SessionState::Error => self.red,
            SessionState::Untracked | SessionState::Removed => self.dim,
        }
    }
}

/// Cut `text` to at most `width` display columns, marking the cut with `…`
pub fn fit(text: &str, width: usize) -> String {
    let text = text.lines().next().unwrap_or("");
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

/// Pad `text` with spaces to `width` display columns
pub fn pad(text: &str, width: usize) -> String {
    let w = text.width();
    if w >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - w))
    }
}

/// Fixed-width text table with a bold header row
pub struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<Cell>>,
    max_width: usize,
}

/// A table cell with an optional color
pub struct Cell {
    text: String,
    color: &'static str,
}

impl Cell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: "",
        }
    }

    pub fn colored(text: impl Into<String>, color: &'static str) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

impl Table {
    /// `max_width` bounds the last column, which is usually free text
    pub fn new(headers: Vec<&'static str>, max_width: usize) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            max_width,
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn render(&self, c: &Colors) -> String {
        let columns = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.width()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(columns) {
                widths[i] = widths[i].max(cell.text.width());
            }
        }
        if let Some(last) = widths.last_mut() {
            *last = (*last).min(self.max_width);
        }

        let mut out = String::new();
        let header: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| pad(h, *w))
            .collect();
        out.push_str(&format!("{}{}{}\n", c.bold, header.join("  ").trim_end(), c.reset));

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (cell, w))| {
                    let text = if i + 1 == columns {
                        fit(&cell.text, *w)
                    } else {
                        pad(&cell.text, *w)
                    };
                    if cell.color.is_empty() {
                        text
                    } else {
                        format!("{}{}{}", cell.color, text, c.reset)
                    }
                })
                .collect();
            out.push_str(cells.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

/// Local wall-clock time for tables
pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Compact "12s ago" style age relative to `now`
pub fn format_age(ts: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - *ts).num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fit_short_text_untouched() {
        assert_eq!(fit("ready", 10), "ready");
    }

    #[test]
    fn test_fit_cuts_on_display_width() {
        assert_eq!(fit("abcdefgh", 5), "abcd…");
        // wide characters take two columns each
        assert_eq!(fit("日本語テキスト", 7), "日本語…");
    }

    #[test]
    fn test_fit_keeps_first_line() {
        assert_eq!(fit("one\ntwo", 10), "one");
    }

    #[test]
    fn test_pad_uses_display_width() {
        assert_eq!(pad("日本", 6), "日本  ");
        assert_eq!(pad("toolong", 3), "toolong");
    }

    #[test]
    fn test_table_render_plain() {
        let mut table = Table::new(vec!["SESSION", "STATE", "SUMMARY"], 12);
        table.push(vec![
            Cell::new("%1"),
            Cell::new("READY"),
            Cell::new("Ready for input: $"),
        ]);
        table.push(vec![
            Cell::new("%12"),
            Cell::new("BUSY"),
            Cell::new("Output changing"),
        ]);

        let rendered = table.render(&Colors::plain());
        assert_eq!(
            rendered,
            "SESSION  STATE  SUMMARY\n\
             %1       READY  Ready for i…\n\
             %12      BUSY   Output chan…\n"
        );
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(&(now - Duration::seconds(5)), now), "5s ago");
        assert_eq!(format_age(&(now - Duration::minutes(3)), now), "3m ago");
        assert_eq!(format_age(&(now - Duration::hours(2)), now), "2h ago");
        assert_eq!(format_age(&(now - Duration::days(4)), now), "4d ago");
        assert_eq!(format_age(&(now + Duration::seconds(5)), now), "0s ago");
    }
}
