use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};

use ptywatch_core::{Settings, StatusRecord};

use crate::output::{format_age, Cell, Colors, Table};

const SUMMARY_WIDTH: usize = 72;

pub fn run(settings: &Settings, since: Option<u64>, json: bool, short: bool) -> Result<()> {
    let now = Utc::now();
    let cutoff = since.and_then(|secs| since_cutoff(now, secs));
    let records = match super::open_store(settings)? {
        Some(store) => store.list_statuses(cutoff)?,
        None => Vec::new(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if short {
        println!("{}", render_short(&records));
    } else {
        print!("{}", render_table(&Colors::new(), &records, now));
    }
    Ok(())
}

/// Start of the `--since` window; `None` when it reaches before any representable time
fn since_cutoff(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let window = TimeDelta::try_seconds(i64::try_from(secs).ok()?)?;
    now.checked_sub_signed(window)
}

/// One line for tmux status bars: `[%1: READY] [%2: BUSY]`
pub fn render_short(records: &[StatusRecord]) -> String {
    if records.is_empty() {
        return "[no sessions]".to_string();
    }
    records
        .iter()
        .map(|r| format!("[{}: {}]", r.session_id, r.state))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_table(c: &Colors, records: &[StatusRecord], now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return format!("{}No sessions tracked.{}\n", c.dim, c.reset);
    }

    let mut table = Table::new(
        vec!["SESSION", "AGENT", "STATE", "POLLED", "SUMMARY"],
        SUMMARY_WIDTH,
    );
    for record in records {
        let polled = record
            .last_polled_at
            .as_ref()
            .map(|ts| format_age(ts, now))
            .unwrap_or_else(|| "never".to_string());
        table.push(vec![
            Cell::new(record.session_id.clone()),
            Cell::new(record.agent_type.clone()),
            Cell::colored(record.state.as_str(), c.state(record.state)),
            Cell::new(polled),
            Cell::new(record.summary.clone()),
        ]);
    }
    table.render(c)
}
