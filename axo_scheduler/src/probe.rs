//! Readiness checks for the resources tasks depend on.

use crate::task::Task;
use std::fmt;
use std::path::{Path, PathBuf};

/// Metadata key holding the file path a `Put` task uploads.
pub const PATH_KEY: &str = "path";

/// Suffix of the marker file present while a resource is being written.
pub const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Missing,
    /// Exists but a writer still holds it
    Writing,
    Ready,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Missing => write!(f, "missing"),
            ResourceState::Writing => write!(f, "writing"),
            ResourceState::Ready => write!(f, "ready"),
        }
    }
}

/// Decides whether the resource behind a task can be used yet.
pub trait ResourceProbe: Send {
    fn probe(&self, task: &Task) -> ResourceState;
}

/// Marker path signalling that `path` is still being written.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut marker = path.as_os_str().to_owned();
    marker.push(LOCK_SUFFIX);
    PathBuf::from(marker)
}

/// Probes the file named by a task's `path` metadata.
#[derive(Debug, Clone, Default)]
pub struct FileResourceProbe;

impl ResourceProbe for FileResourceProbe {
    fn probe(&self, task: &Task) -> ResourceState {
        let Some(path) = task.metadata_value(PATH_KEY) else {
            return ResourceState::Missing;
        };
        let path = Path::new(path);
        if !path.is_file() {
            ResourceState::Missing
        } else if lock_path(path).exists() {
            ResourceState::Writing
        } else {
            ResourceState::Ready
        }
    }
}

/// Probe backed by a closure.
pub struct FnProbe<F>(pub F);

impl<F> ResourceProbe for FnProbe<F>
where
    F: Fn(&Task) -> ResourceState + Send,
{
    fn probe(&self, task: &Task) -> ResourceState {
        (self.0)(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOperation;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_file_probe_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let task = Task::new(TaskOperation::Put, Duration::from_secs(1))
            .with_metadata(PATH_KEY, path.to_string_lossy());
        let probe = FileResourceProbe;

        assert_eq!(probe.probe(&task), ResourceState::Missing);

        fs::write(&path, b"partial").unwrap();
        fs::write(lock_path(&path), b"").unwrap();
        assert_eq!(probe.probe(&task), ResourceState::Writing);

        fs::remove_file(lock_path(&path)).unwrap();
        assert_eq!(probe.probe(&task), ResourceState::Ready);
    }

    #[test]
    fn test_task_without_path_is_missing() {
        let task = Task::new(TaskOperation::Put, Duration::from_secs(1));
        assert_eq!(FileResourceProbe.probe(&task), ResourceState::Missing);
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(lock_path(Path::new("/a/b.txt")), PathBuf::from("/a/b.txt.lock"));
    }

    #[test]
    fn test_fn_probe() {
        let probe = FnProbe(|task: &Task| {
            if task.metadata_value("ready") == Some("yes") {
                ResourceState::Ready
            } else {
                ResourceState::Writing
            }
        });
        let task = Task::new(TaskOperation::Put, Duration::from_secs(1));
        assert_eq!(probe.probe(&task), ResourceState::Writing);
        assert_eq!(probe.probe(&task.with_metadata("ready", "yes")), ResourceState::Ready);
    }
}
