use crate::error::ErrorCode;
use crate::resolve::ScopeHandle;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Advisory lock errors for scope lock files.
#[derive(Debug)]
pub enum LockError {
    Timeout { path: PathBuf, waited: Duration },
    IoError(io::Error),
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::IoError(_) => ErrorCode::StorageFailure,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { path, waited } => {
                write!(
                    f,
                    "{}: lock timed out after {:?} at {}",
                    self.code().code(),
                    waited,
                    path.display()
                )
            }
            Self::IoError(err) => write!(f, "{}: {}", self.code().code(), err),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout { .. } => None,
            Self::IoError(err) => Some(err),
        }
    }
}

#[derive(Debug)]
struct FileGuard {
    file: File,
    path: PathBuf,
}

impl FileGuard {
    fn acquire_exclusive(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if FileExt::try_lock_exclusive(&file).is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(RETRY_INTERVAL);
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Path of the lock file guarding `scope` inside `lock_dir`.
///
/// The name is derived from the level and a hash of the parent id, so ids
/// containing path separators still map to a single flat file, and the same
/// raw id at different levels gets different locks.
#[must_use]
pub fn scope_lock_path(lock_dir: &Path, scope: &ScopeHandle) -> PathBuf {
    let digest = blake3::hash(scope.parent().as_str().as_bytes()).to_hex();
    lock_dir.join(format!("{}-{}.lock", scope.level(), &digest[..16]))
}

/// RAII guard giving the holder exclusive mutation rights on one scope.
///
/// Only one holder per scope exists at a time, across threads and
/// processes sharing the same lock directory. Distinct scopes never block
/// each other. Release happens on drop.
#[derive(Debug)]
pub struct ScopeLock {
    guard: FileGuard,
    scope: ScopeHandle,
}

impl ScopeLock {
    /// Acquire the exclusive lock for `scope`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another holder keeps the lock past
    /// `timeout`, or [`LockError::IoError`] if the lock file cannot be
    /// created.
    pub fn acquire(lock_dir: &Path, scope: &ScopeHandle, timeout: Duration) -> Result<Self, LockError> {
        let path = scope_lock_path(lock_dir, scope);
        let guard = FileGuard::acquire_exclusive(&path, timeout)?;
        tracing::trace!(scope = %scope, path = %path.display(), "scope lock acquired");
        Ok(Self {
            guard,
            scope: scope.clone(),
        })
    }

    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        tracing::trace!(scope = %self.scope, "scope lock released");
    }

    /// Scope this lock guards.
    #[must_use]
    pub const fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}
