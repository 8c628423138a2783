//! Single-writer lease over the shadow store
//!
//! The lease is an exclusive advisory lock on `LOCK`, which also carries the
//! holder's pid. A released lease leaves the file empty, so a pid found in an
//! unlocked file means the previous holder died mid-operation.

use crate::error::{HistoryError, HistoryResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "LOCK";

#[derive(Debug)]
pub struct Lease {
    file: File,
    path: PathBuf,
    stale_holder: Option<u32>,
}

impl Lease {
    /// Take the lease or fail with `Locked` if another holder has it
    pub fn acquire(store_dir: &Path) -> HistoryResult<Self> {
        fs::create_dir_all(store_dir).map_err(HistoryError::store_write(store_dir))?;
        let path = store_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(HistoryError::store_write(&path))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == ErrorKind::WouldBlock {
                return Err(HistoryError::Locked {
                    holder: read_pid(&path),
                });
            }
            return Err(e.into());
        }

        let mut previous = String::new();
        file.read_to_string(&mut previous)?;
        let stale_holder = previous.trim().parse::<u32>().ok();
        if let Some(pid) = stale_holder {
            warn!(
                pid = pid,
                "Reclaiming stale shadow lease left by a process that did not release it"
            );
        }

        file.set_len(0).map_err(HistoryError::store_write(&path))?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id()).map_err(HistoryError::store_write(&path))?;
        file.sync_all().map_err(HistoryError::store_write(&path))?;
        debug!("Acquired shadow lease at {}", path.display());

        Ok(Self {
            file,
            path,
            stale_holder,
        })
    }

    /// Pid of the holder whose lease was reclaimed, if this one was stale
    pub fn stale_holder(&self) -> Option<u32> {
        self.stale_holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!("Failed to clear shadow lease {}: {}", self.path.display(), e);
        }
        let _ = FileExt::unlock(&self.file);
        debug!("Released shadow lease at {}", self.path.display());
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
