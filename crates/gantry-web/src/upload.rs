//! Streaming POST upload sink with optional CRC-32 verification.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use chrono::NaiveDateTime;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use gantry_core::Result;

/// One upload in flight. Owns the target file until finished or
/// cancelled; both paths close it, and cancel removes it.
pub struct Upload {
    path: PathBuf,
    file: File,
    expected_length: u64,
    uploaded: u64,
    hasher: Option<crc32fast::Hasher>,
    expected_crc: Option<u32>,
    last_modified: Option<NaiveDateTime>,
}

impl Upload {
    /// Create the target file and set up the sink. `expected_crc`
    /// switches on per-chunk hashing.
    pub async fn start(
        path: PathBuf,
        expected_length: u64,
        expected_crc: Option<u32>,
        last_modified: Option<NaiveDateTime>,
    ) -> Result<Self> {
        let file = File::create(&path).await?;
        debug!(path = %path.display(), expected_length, "upload started");
        Ok(Self {
            path,
            file,
            expected_length,
            uploaded: 0,
            hasher: expected_crc.map(|_| crc32fast::Hasher::new()),
            expected_crc,
            last_modified,
        })
    }

    /// Append a chunk of body bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(data);
        }
        self.uploaded += data.len() as u64;
        Ok(())
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded >= self.expected_length
    }

    /// Close the file, verify the CRC when one was requested, and apply
    /// the client-supplied modification time. Returns false (and removes
    /// the file) on a CRC mismatch.
    pub async fn finish(mut self) -> bool {
        if self.file.flush().await.is_err() || self.file.sync_all().await.is_err() {
            let _ = tokio::fs::remove_file(&self.path).await;
            return false;
        }
        drop(self.file);

        if let (Some(hasher), Some(expected)) = (self.hasher.take(), self.expected_crc) {
            let actual = hasher.finalize();
            if actual != expected {
                warn!(
                    path = %self.path.display(),
                    expected = format_args!("{expected:08X}"),
                    actual = format_args!("{actual:08X}"),
                    "upload CRC mismatch"
                );
                let _ = std::fs::remove_file(&self.path);
                return false;
            }
        }

        if let Some(when) = self.last_modified {
            apply_mtime(&self.path, when);
        }
        true
    }

    /// Abandon the upload: close and remove the partial file.
    pub async fn cancel(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.path).await;
        debug!(path = %self.path.display(), "upload cancelled");
    }
}

fn apply_mtime(path: &std::path::Path, when: NaiveDateTime) {
    let timestamp = when.and_utc().timestamp();
    if timestamp < 0 {
        return;
    }
    let mtime = UNIX_EPOCH + std::time::Duration::from_secs(timestamp as u64);
    let _ = std::fs::File::options()
        .append(true)
        .open(path)
        .and_then(|f| f.set_modified(mtime));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_without_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.g");

        let mut upload = Upload::start(path.clone(), 4, None, None).await.unwrap();
        upload.write(b"AB").await.unwrap();
        assert!(!upload.is_complete());
        upload.write(b"CD").await.unwrap();
        assert!(upload.is_complete());
        assert!(upload.finish().await);

        assert_eq!(std::fs::read(&path).unwrap(), b"ABCD");
    }

    #[tokio::test]
    async fn upload_with_matching_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.g");
        let crc = crc32fast::hash(b"ABCD");

        let mut upload = Upload::start(path.clone(), 4, Some(crc), None).await.unwrap();
        upload.write(b"ABCD").await.unwrap();
        assert!(upload.finish().await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn upload_with_wrong_crc_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.g");

        let mut upload = Upload::start(path.clone(), 4, Some(0xDEAD_BEEF), None)
            .await
            .unwrap();
        upload.write(b"ABCD").await.unwrap();
        assert!(!upload.finish().await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.g");

        let mut upload = Upload::start(path.clone(), 10, None, None).await.unwrap();
        upload.write(b"part").await.unwrap();
        upload.cancel().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn last_modified_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.g");
        let when = NaiveDateTime::parse_from_str("2026-08-01T12:30:00", "%Y-%m-%dT%H:%M:%S")
            .unwrap();

        let mut upload = Upload::start(path.clone(), 2, None, Some(when)).await.unwrap();
        upload.write(b"ok").await.unwrap();
        assert!(upload.finish().await);

        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        let expected = UNIX_EPOCH + std::time::Duration::from_secs(when.and_utc().timestamp() as u64);
        assert_eq!(mtime, expected);
    }
}
