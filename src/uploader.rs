use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::storage::{remote_name, StorageError, UploadSink};

/// Counts for one traversal pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Recursively collects every regular file under `root`. Sibling order is
/// whatever the directory iterator yields.
fn collect_files(root: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

/// Uploads every file under `source` into `folder_id`, keeping each file's
/// own base name as the remote name. One file failing is logged and skipped;
/// the pass always runs to the end of the tree.
pub async fn upload_all_files<S: UploadSink>(
    sink: &S,
    source: &Path,
    folder_id: &str,
) -> Result<UploadSummary, StorageError> {
    let mut files = Vec::new();
    collect_files(source, &mut files)?;

    let mut summary = UploadSummary::default();
    for path in files {
        let name = remote_name(&path, None);
        summary.attempted += 1;
        match sink.upload_file(&path, &name, folder_id).await {
            Ok(uploaded) => {
                info!("Uploaded '{}' with id {}", uploaded.name, uploaded.id);
                summary.uploaded += 1;
            }
            Err(err) => {
                warn!("Failed to upload '{}': {}", path.display(), err);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Upload pass finished: {} attempted, {} uploaded, {} failed",
        summary.attempted, summary.uploaded, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UploadedFile;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records every attempted upload, failing the one whose name matches.
    struct RecordingSink {
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new(fail_on: Option<&'static str>) -> Self {
            RecordingSink {
                fail_on,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UploadSink for RecordingSink {
        async fn upload_file(
            &self,
            _path: &Path,
            name: &str,
            _folder_id: &str,
        ) -> Result<UploadedFile, StorageError> {
            self.seen.lock().unwrap().push(name.to_string());
            if self.fail_on == Some(name) {
                return Err(StorageError::Api {
                    status: 503,
                    body: "service unavailable".into(),
                });
            }
            Ok(UploadedFile {
                id: format!("id-{name}"),
                name: name.to_string(),
                size: None,
            })
        }
    }

    #[tokio::test]
    async fn every_file_in_a_nested_tree_is_attempted_once() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("one.mp4"), b"x").unwrap();
        fs::write(dir.path().join("a/two.mp4"), b"x").unwrap();
        fs::write(dir.path().join("a/b/three.mp4"), b"x").unwrap();

        let sink = RecordingSink::new(None);
        let summary = upload_all_files(&sink, dir.path(), "42").await.unwrap();

        assert_eq!(
            summary,
            UploadSummary {
                attempted: 3,
                uploaded: 3,
                failed: 0
            }
        );
        let mut seen = sink.seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, ["one.mp4", "three.mp4", "two.mp4"]);
    }

    #[tokio::test]
    async fn one_failing_file_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ok1.mp4"), b"x").unwrap();
        fs::write(dir.path().join("bad.mp4"), b"x").unwrap();
        fs::write(dir.path().join("ok2.mp4"), b"x").unwrap();

        let sink = RecordingSink::new(Some("bad.mp4"));
        let summary = upload_all_files(&sink, dir.path(), "42").await.unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn uploads_use_each_files_base_name() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("deep")).unwrap();
        fs::write(dir.path().join("deep/clip.mp4"), b"x").unwrap();

        let sink = RecordingSink::new(None);
        upload_all_files(&sink, dir.path(), "42").await.unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), ["clip.mp4"]);
    }
}
