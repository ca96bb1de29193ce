//! Home-relative paths.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory
///
/// Paths without one, or a missing home directory, come back unchanged.
#[must_use]
pub fn expand_home(raw: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(raw);
    };
    if raw == "~" {
        return home;
    }
    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

/// `path` made absolute against the working directory
#[must_use]
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/log/x"), PathBuf::from("/var/log/x"));
        assert_eq!(expand_home("rel/~/x"), PathBuf::from("rel/~/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/logs/usage.jsonl"), home.join("logs/usage.jsonl"));
        }
    }

    #[test]
    fn test_absolute() {
        assert_eq!(absolute(Path::new("/tmp/a")), PathBuf::from("/tmp/a"));
        assert!(absolute(Path::new("a/b")).is_absolute());
    }
}
