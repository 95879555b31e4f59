//! Log source discovery.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const WORKER_LOG_PREFIX: &str = "Worker_";

/// Newest regular file in `dir` whose name starts with `Worker_`, by
/// modification time. Ties go to the lexically greater name.
///
/// A missing directory is the same as an empty one.
pub fn newest_worker_log(dir: &Path) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(WORKER_LOG_PREFIX)
        {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        let candidate = (modified, entry.path());
        if newest.as_ref().map_or(true, |current| candidate > *current) {
            newest = Some(candidate);
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(mtime).unwrap();
        path
    }

    #[test]
    fn test_picks_most_recent_worker_log() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Worker_20240501-100000-utc.log", 3600);
        let newest = touch(dir.path(), "Worker_20240502-090000-utc.log", 10);
        touch(dir.path(), "Worker_20240430-080000-utc.log", 7200);

        assert_eq!(newest_worker_log(dir.path()).unwrap(), Some(newest));
    }

    #[test]
    fn test_ignores_other_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let worker = touch(dir.path(), "Worker_1.log", 600);
        touch(dir.path(), "Runner_20240502.log", 0);
        fs::create_dir(dir.path().join("Worker_pages")).unwrap();

        assert_eq!(newest_worker_log(dir.path()).unwrap(), Some(worker));
    }

    #[test]
    fn test_no_match_is_none() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Runner_1.log", 0);
        assert_eq!(newest_worker_log(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_missing_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("_diag");
        assert_eq!(newest_worker_log(&missing).unwrap(), None);
    }
}
