use std::path::{Path, PathBuf};

pub const PHASELANE_DIR: &str = ".phaselane";
pub const CONFIG_FILE: &str = ".phaselane/config.yaml";
pub const STATE_FILE: &str = ".phaselane/state.yaml";

pub fn phaselane_dir(root: &Path) -> PathBuf {
    root.join(PHASELANE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

/// Resolves a configured path relative to the project root.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lives_under_phaselane_dir() {
        let root = Path::new("/work/app");
        assert_eq!(state_path(root), PathBuf::from("/work/app/.phaselane/state.yaml"));
        assert!(config_path(root).starts_with(phaselane_dir(root)));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let root = Path::new("/work/app");
        assert_eq!(resolve(root, Path::new("/tmp/m.jsonl")), PathBuf::from("/tmp/m.jsonl"));
        assert_eq!(
            resolve(root, Path::new("logs/m.jsonl")),
            PathBuf::from("/work/app/logs/m.jsonl")
        );
    }
}
