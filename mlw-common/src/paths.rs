//! Inter-task cache path layout
//!
//! Every task owns `<data_dir>/<task_id>/`. Its cache is `db.sqlite`, or
//! `db_<chunk>.sqlite` when the task processes one chunk of a split input.
//!
//! Selection rule when reading a task directory: with a chunk, prefer
//! `db_<chunk>.sqlite` and fall back to `db.sqlite`; without a chunk only
//! `db.sqlite` is considered.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cache file name of an unchunked task
pub const CACHE_FILENAME: &str = "db.sqlite";

/// Cache file name for a given chunk
pub fn chunk_filename(chunk: &str) -> String {
    format!("db_{chunk}.sqlite")
}

/// Working directory of a task
pub fn task_dir(data_dir: &Path, task_id: &str) -> PathBuf {
    data_dir.join(task_id)
}

/// Where the current task writes its own cache
pub fn task_cache_path(data_dir: &Path, task_id: &str, chunk: Option<&str>) -> PathBuf {
    let name = match chunk {
        Some(chunk) => chunk_filename(chunk),
        None => CACHE_FILENAME.to_string(),
    };
    task_dir(data_dir, task_id).join(name)
}

/// Locate the cache file inside a task directory, if any
pub fn find_task_cache(task_dir: &Path, chunk: Option<&str>) -> Option<PathBuf> {
    if let Some(chunk) = chunk {
        let chunked = task_dir.join(chunk_filename(chunk));
        if chunked.is_file() {
            return Some(chunked);
        }
    }

    let plain = task_dir.join(CACHE_FILENAME);
    plain.is_file().then_some(plain)
}

/// Collect parent cache paths in the order parents are listed
///
/// Parents without a cache file are skipped with a warning.
pub fn parent_cache_paths(data_dir: &Path, parent_ids: &[String], chunk: Option<&str>) -> Vec<PathBuf> {
    parent_ids
        .iter()
        .filter_map(|parent_id| {
            let dir = task_dir(data_dir, parent_id);
            match find_task_cache(&dir, chunk) {
                Some(path) => {
                    debug!(parent = %parent_id, path = %path.display(), "Found parent cache");
                    Some(path)
                }
                None => {
                    warn!(parent = %parent_id, "Parent task has no cache file in {}", dir.display());
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_task_cache_path_uses_chunk() {
        let data = Path::new("/data");
        assert_eq!(
            task_cache_path(data, "task", None),
            PathBuf::from("/data/task/db.sqlite")
        );
        assert_eq!(
            task_cache_path(data, "task", Some("3")),
            PathBuf::from("/data/task/db_3.sqlite")
        );
    }

    #[test]
    fn test_chunked_cache_only_seen_with_chunk() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("db_42.sqlite"), b"").unwrap();

        assert_eq!(
            find_task_cache(tmp.path(), Some("42")),
            Some(tmp.path().join("db_42.sqlite"))
        );
        assert_eq!(find_task_cache(tmp.path(), None), None);
        assert_eq!(find_task_cache(tmp.path(), Some("7")), None);
    }

    #[test]
    fn test_chunk_preferred_over_plain_cache() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("db.sqlite"), b"").unwrap();
        std::fs::write(tmp.path().join("db_1.sqlite"), b"").unwrap();

        assert_eq!(
            find_task_cache(tmp.path(), Some("1")),
            Some(tmp.path().join("db_1.sqlite"))
        );
        assert_eq!(
            find_task_cache(tmp.path(), Some("2")),
            Some(tmp.path().join("db.sqlite"))
        );
        assert_eq!(
            find_task_cache(tmp.path(), None),
            Some(tmp.path().join("db.sqlite"))
        );
    }

    #[test]
    fn test_parent_paths_keep_order_and_skip_missing() {
        let tmp = TempDir::new().unwrap();
        for parent in ["b", "a"] {
            std::fs::create_dir_all(tmp.path().join(parent)).unwrap();
            std::fs::write(tmp.path().join(parent).join("db.sqlite"), b"").unwrap();
        }

        let parents = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let paths = parent_cache_paths(tmp.path(), &parents, None);
        assert_eq!(
            paths,
            vec![
                tmp.path().join("b").join("db.sqlite"),
                tmp.path().join("a").join("db.sqlite"),
            ]
        );
    }
}
