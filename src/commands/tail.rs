use anyhow::Result;

use ptywatch_core::{Settings, StatusHistoryEntry};

use crate::output::{format_time, Cell, Colors, Table};

const SUMMARY_WIDTH: usize = 96;

pub fn run(settings: &Settings, session_id: &str, limit: usize, json: bool) -> Result<()> {
    let entries = match super::open_store(settings)? {
        Some(store) => store.tail_history(session_id, limit)?,
        None => Vec::new(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render(&Colors::new(), session_id, &entries));
    }
    Ok(())
}

pub fn render(c: &Colors, session_id: &str, entries: &[StatusHistoryEntry]) -> String {
    if entries.is_empty() {
        return format!("{}No history for {}.{}\n", c.dim, session_id, c.reset);
    }

    let mut table = Table::new(vec!["TIME", "STATE", "SUMMARY"], SUMMARY_WIDTH);
    for entry in entries {
        table.push(vec![
            Cell::new(format_time(&entry.ts)),
            Cell::colored(entry.state.as_str(), c.state(entry.state)),
            Cell::new(entry.summary.clone()),
        ]);
    }
    table.render(c)
}
