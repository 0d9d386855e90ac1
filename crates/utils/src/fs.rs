//! Small file helpers for durable session state

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tokio::{fs, io::AsyncWriteExt};

/// Create `dir` and its parents. Returns `true` when it did not exist before.
pub async fn ensure_dir(dir: &Path) -> io::Result<bool> {
    if fs::try_exists(dir).await? {
        return Ok(false);
    }
    fs::create_dir_all(dir).await?;
    Ok(true)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `contents` via a sibling temp file and a rename, so a
/// reader never sees a half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp, path).await
}

pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let content = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(path, &content).await
}

/// Append one line. Earlier lines are never rewritten.
pub async fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line.trim_end_matches('\n'));
    buf.push('\n');
    file.write_all(buf.as_bytes()).await?;
    file.flush().await
}

/// Append `value` as a single JSON line.
pub async fn append_json_line<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let line = serde_json::to_string(value).map_err(io::Error::other)?;
    append_line(path, &line).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "second");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_append_json_line_keeps_earlier_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.jsonl");

        append_json_line(&path, &json!({"action": "plan"})).await.unwrap();
        append_json_line(&path, &json!({"action": "implement"})).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"action":"plan"}"#);
        assert_eq!(lines[1], r#"{"action":"implement"}"#);
    }

    #[tokio::test]
    async fn test_ensure_dir_reports_creation() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        assert!(ensure_dir(&nested).await.unwrap());
        assert!(!ensure_dir(&nested).await.unwrap());
    }
}
