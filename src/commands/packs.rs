use anyhow::{bail, Result};
use std::sync::Arc;

use ptywatch_core::detectors::PackSource;
use ptywatch_core::{ClassifierPack, PackRegistry, Settings};

use crate::output::{Cell, Colors, Table};

pub fn run(settings: &Settings) -> Result<()> {
    let (registry, errors) = PackRegistry::load(settings.classifier.packs_dir.as_deref());
    let c = Colors::new();
    print!("{}", render(&c, &registry.list()));

    if !errors.is_empty() {
        eprintln!();
        for e in &errors {
            eprintln!("{}error:{} {}", c.bold, c.reset, e);
        }
        bail!("{} classifier pack(s) failed to load", errors.len());
    }
    Ok(())
}

pub fn render(c: &Colors, packs: &[Arc<ClassifierPack>]) -> String {
    let mut table = Table::new(vec!["PACK", "PATTERNS", "STABILITY", "TAIL", "SOURCE"], 80);
    for pack in packs {
        let source = match &pack.source {
            PackSource::Builtin => "built-in".to_string(),
            PackSource::File(path) => path.display().to_string(),
        };
        table.push(vec![
            Cell::new(pack.name.clone()),
            Cell::new(pack.pattern_count().to_string()),
            Cell::new(optional(pack.stability_polls)),
            Cell::new(optional(pack.tail_lines)),
            Cell::colored(source, c.dim),
        ]);
    }
    table.render(c)
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_builtin_packs() {
        let registry = PackRegistry::builtin();
        let rendered = render(&Colors::plain(), &registry.list());

        for name in ["claude", "codex", "generic", "shell"] {
            assert!(
                rendered.lines().any(|l| l.starts_with(name)),
                "missing {} in\n{}",
                name,
                rendered
            );
        }
        assert!(rendered.contains("built-in"));
    }

    #[test]
    fn test_directory_pack_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("aider.yaml"),
            "stability_polls: 4\nready_patterns: ['^> $']\n",
        )
        .unwrap();
        let (registry, errors) = PackRegistry::load(Some(dir.path()));
        assert!(errors.is_empty());

        let rendered = render(&Colors::plain(), &registry.list());
        let line = rendered
            .lines()
            .find(|l| l.starts_with("aider"))
            .unwrap();
        assert!(line.contains("aider.yaml"));
        assert!(line.contains('4'));
    }
}
