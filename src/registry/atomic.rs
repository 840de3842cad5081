use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Creates a file in `dir` named `base || hex || extension`, where `hex` is a
/// random suffix. The file is created exclusively and is only readable by the
/// current user. Returns `ErrorKind::AlreadyExists` only after several retries.
fn create_sibling_file(dir: &Path, base: &str, extension: &str) -> io::Result<(PathBuf, File)> {
    const RETRIES: usize = 16;

    let mut rng = StdRng::from_entropy();

    for _ in 0..RETRIES {
        let mut suffix = [0u8; 8];

        rng.fill_bytes(&mut suffix);

        let mut filename = String::from(base);

        for b in suffix {
            let _ = write!(filename, "{:02x}", b);
        }

        filename.push_str(extension);

        let path = dir.join(filename);

        let mut options = OpenOptions::new();

        options.write(true).create_new(true);

        #[cfg(unix)]
        options.mode(0o600);

        match options.open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("failed to create a temporary file after {} retries", RETRIES),
    ))
}

/// A staged replacement for a file. Unless it is persisted, the staged file
/// is unlinked when dropped.
struct Staged {
    path: PathBuf,
    file: Option<File>,
}

impl Drop for Staged {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Replaces the contents of `target` with `contents`.
///
/// A reader never observes a truncated file: the new contents are written and
/// synced to a sibling file, which is then renamed over `target`. On failure
/// the staged file is removed and `target` is untouched.
pub(crate) fn write_atomically(target: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let base = match target.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("\"{}\" does not name a file", target.display()),
            ))
        }
    };

    let (path, file) = create_sibling_file(dir, &base, ".tmp")?;

    let mut staged = Staged {
        path,
        file: Some(file),
    };

    if let Some(file) = staged.file.as_mut() {
        file.write_all(contents)?;
        file.sync_all()?;
    }

    // Keep the permissions of the file being replaced.
    if let Ok(metadata) = std::fs::metadata(target) {
        std::fs::set_permissions(&staged.path, metadata.permissions())?;
    }

    std::fs::rename(&staged.path, target)?;

    staged.file.take();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("config.yaml");

        std::fs::write(&target, "old").unwrap();
        write_atomically(&target, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert_eq!(dir_entries(dir.path()), vec!["config.yaml"]);
    }

    #[test]
    fn test_creates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh.yaml");

        write_atomically(&target, b"model_list: []\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "model_list: []\n"
        );
    }

    #[test]
    fn test_failure_leaves_no_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        // Renaming a file over a non-empty directory fails.
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        assert!(write_atomically(&target, b"new").is_err());
        assert_eq!(dir_entries(dir.path()), vec!["occupied"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("config.yaml");

        std::fs::write(&target, "old").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_atomically(&target, b"new").unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
