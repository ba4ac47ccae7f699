use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first and falls back to
/// copy + delete when rename fails (cross-device moves).
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let move_err = |e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };
    std::fs::copy(src, dst).map_err(move_err)?;
    std::fs::remove_file(src).map_err(move_err)?;
    Ok(())
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

pub fn read_to_string(path: &Path) -> Result<String, StorageError> {
    std::fs::read_to_string(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes `content` to `path`, replacing any existing file. The parent
/// directory is created if needed.
pub fn write_file(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    std::fs::write(path, content).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn remove_file(path: &Path) -> Result<(), StorageError> {
    std::fs::remove_file(path).map_err(|e| StorageError::RemoveFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes `content` under `directory` without overwriting. If `filename` is
/// taken, `name_2.ext`, `name_3.ext`, ... are tried. Creation uses
/// `create_new` so a concurrent writer can never be clobbered.
pub fn write_new_file(
    directory: &Path,
    filename: &str,
    content: &[u8],
) -> Result<PathBuf, StorageError> {
    ensure_directory(directory)?;

    for candidate in candidate_names(filename) {
        let path = directory.join(&candidate);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(content)
                    .map_err(|e| StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }
    }

    Err(StorageError::FileExists(directory.join(filename)))
}

/// Moves `src` into `directory`, keeping its file name unless that name is
/// already taken there.
pub fn move_into(src: &Path, directory: &Path) -> Result<PathBuf, StorageError> {
    ensure_directory(directory)?;
    let filename = src
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let target = candidate_names(filename)
        .map(|name| directory.join(name))
        .find(|path| std::fs::symlink_metadata(path).is_err())
        .ok_or_else(|| StorageError::FileExists(directory.join(filename)))?;

    move_file(src, &target)?;
    Ok(target)
}

fn candidate_names(filename: &str) -> impl Iterator<Item = String> + '_ {
    let (base, ext) = match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        _ => (filename, None),
    };

    (1..=1000).map(move |counter| match (counter, ext) {
        (1, _) => filename.to_string(),
        (n, Some(ext)) => format!("{}_{}{}", base, n, ext),
        (n, None) => format!("{}_{}", base, n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_new_file_conflict_resolution() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("m1");

        let first = write_new_file(&dir, "invoice.pdf", b"First").unwrap();
        let second = write_new_file(&dir, "invoice.pdf", b"Second").unwrap();
        let third = write_new_file(&dir, "invoice.pdf", b"Third").unwrap();

        assert!(first.ends_with("invoice.pdf"));
        assert!(second.ends_with("invoice_2.pdf"));
        assert!(third.ends_with("invoice_3.pdf"));
        assert_eq!(std::fs::read(&first).unwrap(), b"First");
    }

    #[test]
    fn test_write_new_file_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        write_new_file(temp_dir.path(), "README", b"a").unwrap();
        let second = write_new_file(temp_dir.path(), "README", b"b").unwrap();
        assert!(second.ends_with("README_2"));
    }

    #[test]
    fn test_write_file_overwrites_and_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deep/nested/metadata.json");

        write_file(&path, b"{}").unwrap();
        write_file(&path, b"{\"id\":1}").unwrap();

        assert_eq!(read_to_string(&path).unwrap(), "{\"id\":1}");
    }

    #[test]
    fn test_move_into_keeps_name_and_avoids_clobbering() {
        let temp_dir = TempDir::new().unwrap();
        let processed = temp_dir.path().join("processed");
        let a = temp_dir.path().join("scan.txt");
        std::fs::write(&a, "one").unwrap();

        let moved = move_into(&a, &processed).unwrap();
        assert!(!a.exists());
        assert_eq!(moved, processed.join("scan.txt"));

        std::fs::write(&a, "two").unwrap();
        let moved_again = move_into(&a, &processed).unwrap();
        assert_eq!(moved_again, processed.join("scan_2.txt"));
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "one");
    }

    #[test]
    fn test_remove_missing_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let result = remove_file(&temp_dir.path().join("missing"));
        assert!(matches!(result, Err(StorageError::RemoveFile { .. })));
    }
}
