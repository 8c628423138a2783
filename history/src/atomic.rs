use crate::error::{HistoryError, HistoryResult};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `bytes` to `path` inside the shadow store so that readers see
/// either the old file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> HistoryResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HistoryError::CorruptHistory {
            reason: format!("store path has no parent: {}", path.display()),
        })?;
    fs::create_dir_all(dir).map_err(HistoryError::store_write(dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(HistoryError::store_write(dir))?;
    tmp.write_all(bytes).map_err(HistoryError::store_write(path))?;
    tmp.as_file()
        .sync_all()
        .map_err(HistoryError::store_write(path))?;
    tmp.persist(path)
        .map_err(|e| HistoryError::store_write(path)(e.error))?;
    Ok(())
}
