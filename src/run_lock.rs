// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The cross-process run-lock that serialises engine `run` calls when the
//! engine is subject to the known rootless OCI runtime race.
//!
//! On Linux the lock is a blocking exclusive advisory lock on a well-known
//! file under the per-user runtime directory, so the kernel releases it if
//! the holding process dies. On other platforms an advisory lock on the
//! host filesystem wouldn't reach a VM-hosted engine's namespace, so an
//! in-process mutex is the honest best effort there.

use snafu::Snafu;

const LOCK_FILE_NAME: &str = "invowk-podman.lock";

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum AcquireRunLockError {
    #[snafu(display(
        "Couldn't open the lock file '{}': {}",
        path,
        source,
    ))]
    OpenLockFileFailed{source: std::io::Error, path: String},
    #[snafu(display("Couldn't lock '{}': {}", path, source))]
    LockFailed{source: nix::Error, path: String},
}

#[cfg(target_os = "linux")]
pub use linux::RunLock;

#[cfg(target_os = "linux")]
mod linux {
    use std::env;
    use std::fs::File;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;
    use std::path::PathBuf;

    use nix::fcntl::FlockArg;
    use nix::fcntl::flock;
    use snafu::ResultExt;

    use super::AcquireRunLockError;
    use super::LOCK_FILE_NAME;
    use super::LockFailed;
    use super::OpenLockFileFailed;

    // `RunLock` holds the advisory lock for its lifetime; dropping it (or
    // process exit) releases it.
    pub struct RunLock {
        file: File,
    }

    impl RunLock {
        // `acquire` blocks until the exclusive lock is granted.
        pub fn acquire() -> Result<RunLock, AcquireRunLockError> {
            let dir = env::var_os("XDG_RUNTIME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir);

            let path = dir.join(LOCK_FILE_NAME);

            let file =
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(&path)
                    .context(OpenLockFileFailed{
                        path: path.display().to_string(),
                    })?;

            flock(file.as_raw_fd(), FlockArg::LockExclusive)
                .context(LockFailed{path: path.display().to_string()})?;

            Ok(RunLock{file})
        }
    }

    impl Drop for RunLock {
        fn drop(&mut self) {
            // Closing the descriptor would release the lock anyway; the
            // explicit unlock just makes the release immediate.
            let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use fallback::RunLock;

#[cfg(not(target_os = "linux"))]
mod fallback {
    use std::sync::Mutex;
    use std::sync::MutexGuard;

    use super::AcquireRunLockError;

    static PROCESS_LOCK: Mutex<()> = Mutex::new(());

    pub struct RunLock {
        _guard: MutexGuard<'static, ()>,
    }

    impl RunLock {
        pub fn acquire() -> Result<RunLock, AcquireRunLockError> {
            let guard =
                match PROCESS_LOCK.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };

            Ok(RunLock{_guard: guard})
        }
    }
}
