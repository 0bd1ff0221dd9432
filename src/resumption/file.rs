//! Single-file snapshot backend.
//!
//! The snapshot is written to a sibling temp file, synced, then renamed over
//! the target so a crash mid-write leaves the previous snapshot intact.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::codec;
use super::{PersistenceError, ResumptionSnapshot, ResumptionStore};

/// File-backed resumption store.
#[derive(Debug, Clone)]
pub struct FileResumptionStore {
    path: PathBuf,
    sync_on_write: bool,
}

impl FileResumptionStore {
    /// Creates a store at `path`. Parent directories are created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
        }
    }

    /// Whether to fsync before the rename (slower but survives power loss).
    #[must_use]
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ResumptionStore for FileResumptionStore {
    fn load(&self) -> Result<Option<ResumptionSnapshot>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        match codec::read_record(&mut reader) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) => {
                Err(PersistenceError::Corrupted { reason: e.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &ResumptionSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            let mut writer = BufWriter::new(file);
            codec::write_record(&mut writer, snapshot)?;
            writer.flush()?;
            if self.sync_on_write {
                writer.get_ref().sync_all()?;
            }
        }
        fs::rename(&temp, &self.path)?;

        debug!(
            path = %self.path.display(),
            regions = snapshot.regions.len(),
            events = snapshot.events.len(),
            "resumption snapshot saved"
        );
        Ok(())
    }
}
