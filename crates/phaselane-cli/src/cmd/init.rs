use anyhow::Context;
use phaselane_core::config::Config;
use phaselane_core::paths;
use phaselane_core::store::FileProjectStore;
use std::path::Path;

/// What [`scaffold`] did with each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaffolded {
    pub config_created: bool,
    pub state_created: bool,
}

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing phaselane in: {}", root.display());
    let done = scaffold(root)?;
    report(paths::CONFIG_FILE, done.config_created);
    report(paths::STATE_FILE, done.state_created);
    Ok(())
}

fn report(file: &str, created: bool) {
    if created {
        println!("  created: {file}");
    } else {
        println!("  exists:  {file}");
    }
}

/// Creates `.phaselane/` with a default config and a fresh state file.
/// Existing files are left untouched.
pub fn scaffold(root: &Path) -> anyhow::Result<Scaffolded> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let dir = paths::phaselane_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_created = !paths::config_path(root).exists();
    if config_created {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
    }

    let state_created =
        FileProjectStore::init(root, &project_name).context("failed to write state.yaml")?;

    Ok(Scaffolded {
        config_created,
        state_created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaselane_core::store::ProjectState;
    use phaselane_core::types::Phase;
    use tempfile::TempDir;

    #[test]
    fn scaffold_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = scaffold(dir.path()).unwrap();
        assert!(first.config_created && first.state_created);

        let second = scaffold(dir.path()).unwrap();
        assert!(!second.config_created && !second.state_created);

        let state = ProjectState::load(dir.path()).unwrap();
        assert_eq!(state.phase, Phase::Analyst);
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new("custom");
        config.quick_lane.command = Some("quick-model".into());
        config.save(dir.path()).unwrap();

        let done = scaffold(dir.path()).unwrap();
        assert!(!done.config_created);
        assert!(done.state_created);
        assert_eq!(
            Config::load(dir.path()).unwrap().quick_lane.command.as_deref(),
            Some("quick-model")
        );
    }
}
