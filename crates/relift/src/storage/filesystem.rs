use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Writes generated artifacts under the configured export directory.
pub struct ArtifactStore {
    export_directory: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(export_directory: P) -> Self {
        Self {
            export_directory: export_directory.as_ref().to_path_buf(),
        }
    }

    pub fn export_directory(&self) -> &Path {
        &self.export_directory
    }

    pub fn store(
        &self,
        content: &[u8],
        relative_directory: &str,
        filename: &str,
        extension: &str,
    ) -> Result<PathBuf, StorageError> {
        let dir_path = self.export_directory.join(relative_directory);
        self.ensure_directory(&dir_path)?;

        let full_filename = format!("{}.{}", filename, extension);

        // Atomic file creation with O_EXCL avoids TOCTOU races between
        // concurrent jobs exporting into the same directory.
        self.store_with_atomic_creation(&dir_path, &full_filename, content)
    }

    /// Stores content using atomic file creation, falling back to
    /// numbered variants while the name is taken.
    fn store_with_atomic_creation(
        &self,
        dir_path: &Path,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        use std::io::Write;

        let (base, ext) = if let Some(dot_pos) = filename.rfind('.') {
            (&filename[..dot_pos], Some(&filename[dot_pos..]))
        } else {
            (filename, None)
        };

        // Try original filename first, then numbered variants
        for counter in 1..=1000 {
            let try_filename = if counter == 1 {
                filename.to_string()
            } else {
                match ext {
                    Some(ext) => format!("{}_{}{}", base, counter, ext),
                    None => format!("{}_{}", base, counter),
                }
            };

            let try_path = dir_path.join(&try_filename);

            // create_new fails if the file exists - atomic check-and-create
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(mut file) => {
                    file.write_all(content)
                        .map_err(|e| StorageError::WriteFile {
                            path: try_path.clone(),
                            source: e,
                        })?;
                    return Ok(try_path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    continue;
                }
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    });
                }
            }
        }

        // Exhausted all attempts
        Err(StorageError::FileExists(dir_path.join(filename)))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
