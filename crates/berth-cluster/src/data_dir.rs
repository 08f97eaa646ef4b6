//! Local data directory inspection

use std::path::Path;

use tracing::{error, info};

/// True if `dir` exists and holds at least one entry.
///
/// A directory that is missing or cannot be opened is the normal first-boot
/// case and yields `false`. Listing errors are logged and also yield `false`,
/// so the node attempts a fresh join rather than trusting unreadable state.
pub async fn has_replicated_state(dir: &Path) -> bool {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            info!(
                dir = %dir.display(),
                error = %e,
                "failed to open directory, maybe start for the first time"
            );
            return false;
        }
    };

    match entries.next_entry().await {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "failed to list directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!has_replicated_state(&tmp.path().join("member")).await);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let member = tmp.path().join("member");
        std::fs::create_dir(&member).unwrap();
        assert!(!has_replicated_state(&member).await);
    }

    #[tokio::test]
    async fn test_non_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let member = tmp.path().join("member");
        std::fs::create_dir_all(member.join("wal")).unwrap();
        assert!(has_replicated_state(&member).await);
    }

    #[tokio::test]
    async fn test_path_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let member = tmp.path().join("member");
        std::fs::write(&member, b"not a directory").unwrap();
        assert!(!has_replicated_state(&member).await);
    }
}
