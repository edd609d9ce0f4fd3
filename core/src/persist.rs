//! Shared atomic-file-write helper used by the Scheduler and the
//! Checkpoint Store: write to a temp file in the same directory, fsync,
//! then rename. A partially written file is never observable as
//! current.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Write `bytes` to `path` atomically.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        CoreError::InvalidArgument(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(dir)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()))
}

/// Shift `.N.bak` backups up by one, dropping the oldest past
/// `retention`. Returns the path the newest backup should be written to.
pub fn rotate_backups(dir: &Path, stem: &str, retention: usize) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let bak = |n: usize| dir.join(format!("{stem}.{n}.bak"));

    let oldest = bak(retention);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..retention).rev() {
        let src = bak(n);
        if src.exists() {
            fs::rename(&src, bak(n + 1))?;
        }
    }
    Ok(bak(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_is_visible_whole_or_not_at_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        // temp file must not linger
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn rotate_backups_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        for gen in 0..5 {
            let target = rotate_backups(dir.path(), "state", 3).unwrap();
            fs::write(&target, format!("gen-{gen}")).unwrap();
        }
        assert!(dir.path().join("state.1.bak").exists());
        assert!(dir.path().join("state.2.bak").exists());
        assert!(dir.path().join("state.3.bak").exists());
    }
}
