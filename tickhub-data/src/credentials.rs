/// Upstream credential handling
///
/// The access token lives in a file maintained by an external auth
/// flow. It is read fresh for every connection attempt, and a small
/// watcher polls the file so a renewed token takes effect without a
/// restart.
use crate::error::DataError;
use crate::feed::FeedCommand;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Load the access token, trimming surrounding whitespace.
pub async fn read_token(path: &Path) -> Result<String, DataError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| DataError::Credential(format!("{}: {}", path.display(), error)))?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(DataError::Credential(format!(
            "{}: credential file is empty",
            path.display()
        )));
    }
    Ok(token.to_string())
}

/// Poll the credential file and force a feed reconnect when its mtime
/// moves forward. The first observation only sets the baseline. Runs
/// until the feed side goes away.
pub async fn watch_credentials(path: PathBuf, poll: Duration, feed: mpsc::Sender<FeedCommand>) {
    let mut last_modified: Option<SystemTime> = None;
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        match tokio::fs::metadata(&path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => {
                if last_modified.is_some_and(|previous| modified > previous) {
                    info!("credential file {} changed, forcing reconnect", path.display());
                    if feed.send(FeedCommand::Reconnect).await.is_err() {
                        return;
                    }
                }
                last_modified = Some(modified);
            }
            Err(error) => {
                debug!("credential file {} not readable: {}", path.display(), error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tickhub-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_read_token_trims_whitespace() {
        let path = scratch_file("token-trim");
        std::fs::write(&path, "  abc.def.ghi\n").unwrap();

        let token = read_token(&path).await.unwrap();
        assert_eq!(token, "abc.def.ghi");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_read_token_missing_file() {
        let path = scratch_file("token-missing");
        std::fs::remove_file(&path).ok();

        let error = read_token(&path).await.unwrap_err();
        assert!(matches!(error, DataError::Credential(_)));
    }

    #[tokio::test]
    async fn test_read_token_rejects_empty_file() {
        let path = scratch_file("token-empty");
        std::fs::write(&path, "   \n").unwrap();

        let error = read_token(&path).await.unwrap_err();
        assert!(matches!(error, DataError::Credential(_)));

        std::fs::remove_file(&path).ok();
    }

    /// Push the file's mtime well past anything the watcher could have
    /// already observed, immune to filesystem timestamp granularity.
    fn bump_mtime(path: &Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        let times = std::fs::FileTimes::new()
            .set_modified(SystemTime::now() + Duration::from_secs(3_600));
        file.set_times(times).unwrap();
    }

    #[tokio::test]
    async fn test_watch_reconnects_once_per_mtime_change() {
        let path = scratch_file("token-watch");
        std::fs::write(&path, "abc.def.ghi").unwrap();

        let (feed_tx, mut feed_rx) = mpsc::channel(4);
        tokio::spawn(watch_credentials(
            path.clone(),
            Duration::from_millis(20),
            feed_tx,
        ));

        // The first observation only sets the baseline
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(feed_rx.try_recv().is_err());

        bump_mtime(&path);
        let command = tokio::time::timeout(Duration::from_secs(5), feed_rx.recv())
            .await
            .expect("reconnect within the timeout")
            .unwrap();
        assert!(matches!(command, FeedCommand::Reconnect));

        // Stable mtime afterwards: no repeat
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(feed_rx.try_recv().is_err());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_watch_tolerates_missing_file() {
        let path = scratch_file("token-watch-missing");
        std::fs::remove_file(&path).ok();

        let (feed_tx, mut feed_rx) = mpsc::channel(4);
        tokio::spawn(watch_credentials(
            path.clone(),
            Duration::from_millis(20),
            feed_tx,
        ));

        // Nothing to observe yet and no baseline to compare against
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(feed_rx.try_recv().is_err());

        // The file appearing is the baseline, not a change
        std::fs::write(&path, "abc.def.ghi").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(feed_rx.try_recv().is_err());

        bump_mtime(&path);
        let command = tokio::time::timeout(Duration::from_secs(5), feed_rx.recv())
            .await
            .expect("reconnect within the timeout")
            .unwrap();
        assert!(matches!(command, FeedCommand::Reconnect));

        std::fs::remove_file(&path).ok();
    }
}
