//! Import file access and progress tracking.
//!
//! A [`FileSource`] opens the file to import and remembers how far a previous
//! run got, so an interrupted import resumes instead of republishing rows.

use std::{
    fmt,
    io::Read,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

/// Access to import files and their checkpoints.
#[async_trait]
pub trait FileSource: Send + Sync + fmt::Debug {
    /// Opens `path` for blocking reads.
    async fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Records that every data row before `offset` has been handled.
    async fn checkpoint(&self, path: &str, offset: u64) -> Result<()>;

    /// Row offset to resume from, or 0 for a fresh import.
    async fn resume_offset(&self, path: &str) -> Result<u64>;

    /// Records that `path` was imported in full.
    async fn mark_completed(&self, path: &str) -> Result<()>;
}

/// Reads files from disk and keeps checkpoints under a state directory.
///
/// For an import of `data/users.csv` the state directory holds
/// `data_users.csv-<hash>.offset` and, once finished,
/// `data_users.csv-<hash>.done`, where `<hash>` is derived from the full
/// path so that `data/users.csv` and `data_users.csv` never share state.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    state_dir: PathBuf,
}

impl LocalFileSource {
    /// Creates a source that stores state in `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into() }
    }

    fn state_file(&self, path: &str, extension: &str) -> PathBuf {
        let name: String = path
            .trim_start_matches(['/', '.'])
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let digest = Sha256::digest(path.as_bytes());
        let hash: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
        self.state_dir.join(format!("{name}-{hash}.{extension}"))
    }

    async fn write_state(&self, target: &Path, contents: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.state_dir).await?;
        let staging = target.with_extension("tmp");
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, target).await?;
        Ok(())
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    async fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    async fn checkpoint(&self, path: &str, offset: u64) -> Result<()> {
        let target = self.state_file(path, "offset");
        self.write_state(&target, offset.to_string()).await?;
        debug!(path, offset, "import checkpoint written");
        Ok(())
    }

    async fn resume_offset(&self, path: &str) -> Result<u64> {
        match tokio::fs::read_to_string(self.state_file(path, "offset")).await {
            Ok(contents) => contents.trim().parse().map_err(|e| {
                crate::error::IngestError::import(format!("corrupt checkpoint for {path}: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_completed(&self, path: &str) -> Result<()> {
        let target = self.state_file(path, "done");
        self.write_state(&target, chrono::Utc::now().to_rfc3339()).await
    }
}

/// In-memory file source for tests.
pub mod mock {
    use std::{
        collections::{HashMap, HashSet},
        io::Cursor,
        sync::Mutex,
    };

    use super::*;

    #[derive(Debug, Default)]
    struct State {
        files: HashMap<String, Vec<u8>>,
        offsets: HashMap<String, u64>,
        checkpoints: Vec<(String, u64)>,
        completed: HashSet<String>,
    }

    /// Serves files from memory and records checkpoint calls.
    #[derive(Debug, Default)]
    pub struct MemoryFileSource {
        state: Mutex<State>,
    }

    impl MemoryFileSource {
        /// Creates an empty source.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a file.
        pub fn add_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
            self.lock().files.insert(path.into(), contents.into());
        }

        /// Sets the stored offset as if a previous run had checkpointed it.
        pub fn set_offset(&self, path: impl Into<String>, offset: u64) {
            self.lock().offsets.insert(path.into(), offset);
        }

        /// Every checkpoint call, in order.
        pub fn checkpoints(&self) -> Vec<(String, u64)> {
            self.lock().checkpoints.clone()
        }

        /// Whether `path` was marked completed.
        pub fn is_completed(&self, path: &str) -> bool {
            self.lock().completed.contains(path)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl FileSource for MemoryFileSource {
        async fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
            let contents = self.lock().files.get(path).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("{path} not found"))
            })?;
            Ok(Box::new(Cursor::new(contents)))
        }

        async fn checkpoint(&self, path: &str, offset: u64) -> Result<()> {
            let mut state = self.lock();
            state.offsets.insert(path.to_string(), offset);
            state.checkpoints.push((path.to_string(), offset));
            Ok(())
        }

        async fn resume_offset(&self, path: &str) -> Result<u64> {
            Ok(self.lock().offsets.get(path).copied().unwrap_or(0))
        }

        async fn mark_completed(&self, path: &str) -> Result<()> {
            self.lock().completed.insert(path.to_string());
            Ok(())
        }
    }
}
