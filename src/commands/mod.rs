pub mod packs;
pub mod status;
pub mod tail;
pub mod watch;

use anyhow::{Context, Result};
use std::path::Path;

use ptywatch_core::{Settings, StatusStore};

/// Open the status store for reading; `None` when the watcher never ran
fn open_store(settings: &Settings) -> Result<Option<StatusStore>> {
    let path: &Path = &settings.store.path;
    if !path.exists() {
        return Ok(None);
    }
    let store = StatusStore::open(path)
        .with_context(|| format!("Failed to open status store: {:?}", path))?;
    Ok(Some(store))
}
