//! Access to file blobs referenced by `File` rows.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use models::{FileStatus, FileStore};

/// Resolves blob ids to files in local storage.
pub struct FileManager {
    files: Arc<FileStore>,
    files_dir: PathBuf,
}

/// An opened blob. The path points at local storage, so callers that
/// only need a path can reuse it without copying the content.
pub struct DownloadedFile {
    pub path: PathBuf,
    pub file: std::fs::File,
}

impl FileManager {
    pub fn new(files: Arc<FileStore>, files_dir: PathBuf) -> Self {
        Self { files, files_dir }
    }

    /// Opens the blob with the given id. A missing row triggers one
    /// mirror sync and a retry: the row may have been committed after
    /// the last background sync.
    pub fn download(&self, id: i64) -> anyhow::Result<DownloadedFile> {
        let file = match self.files.get(id) {
            Ok(file) => file,
            Err(models::Error::NoRows) => {
                self.files.sync().context("cannot sync files")?;
                self.files
                    .get(id)
                    .with_context(|| format!("cannot find file {}", id))?
            }
            Err(err) => return Err(err).context("cannot read file store"),
        };
        if file.status != FileStatus::Available {
            anyhow::bail!("file {} is not available", id);
        }
        let path = self.files_dir.join(&file.path);
        let handle = std::fs::File::open(&path)
            .with_context(|| format!("cannot open blob {}", path.display()))?;
        Ok(DownloadedFile { path, file: handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::File;

    #[test]
    fn test_download_syncs_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let db = db::Database::new_sqlite(dir.path().join("db.sqlite"));
        models::schema::create_tables(&db).unwrap();
        let store = Arc::new(models::new_file_store(db.clone()));
        store.init().unwrap();
        let manager = FileManager::new(store.clone(), dir.path().to_path_buf());

        std::fs::write(dir.path().join("blob.txt"), "data").unwrap();
        // Created through a second mirror: the manager's store has not
        // seen the row yet and must sync to find it.
        let writer = models::new_file_store(db);
        writer.init().unwrap();
        let mut file = File {
            status: FileStatus::Available,
            path: "blob.txt".into(),
            ..Default::default()
        };
        writer.create(&mut file).unwrap();

        let downloaded = manager.download(file.id).unwrap();
        assert_eq!(downloaded.path, dir.path().join("blob.txt"));
        assert!(manager.download(file.id + 100).is_err());
    }
}
