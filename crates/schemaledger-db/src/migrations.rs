use std::path::{Path, PathBuf};

use schemaledger_common::{Error, Result};
use tracing::debug;

use crate::schema::MAX_FILENAME_LEN;

/// A migration file found on disk. The filename is the ledger key, so names
/// should carry a sortable prefix such as `001_` or a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub filename: String,
    pub path: PathBuf,
    pub sql: String,
}

/// A directory of `.sql` migration files.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every `.sql` file directly inside the directory, sorted by filename.
    /// Symlinks to regular files are followed.
    pub fn discover(&self) -> Result<Vec<MigrationFile>> {
        if !self.dir.is_dir() {
            return Err(Error::Config(format!(
                "migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !path.extension().is_some_and(|x| x == "sql") {
                continue;
            }

            let filename = entry.file_name().into_string().map_err(|name| {
                Error::Config(format!("migration filename is not valid UTF-8: {name:?}"))
            })?;
            if filename.len() > MAX_FILENAME_LEN {
                return Err(Error::Config(format!(
                    "migration filename exceeds {MAX_FILENAME_LEN} bytes: {filename}"
                )));
            }

            let sql = std::fs::read_to_string(&path)?;
            files.push(MigrationFile { filename, path, sql });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!(
            "discovered {} migration files in {}",
            files.len(),
            self.dir.display()
        );
        Ok(files)
    }
}
