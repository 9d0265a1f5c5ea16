//! Atomic artifact writes
//!
//! Audio is written into a temporary file next to its destination and renamed
//! into place, so a destination path either holds a complete file or nothing.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::SpeechError;

/// Create a temporary file in the directory of `destination`
///
/// Parent directories are created as needed. The file is removed on drop
/// unless persisted.
pub(crate) fn temp_file_beside(destination: &Path, ext: &str) -> Result<NamedTempFile, SpeechError> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    tempfile::Builder::new()
        .prefix(".narrator-")
        .suffix(&format!(".{ext}"))
        .tempfile_in(dir)
        .map_err(|e| {
            SpeechError::AudioProcessing(format!(
                "Failed to create temp file in {}: {e}",
                dir.display()
            ))
        })
}

fn write_synced(temp: &mut NamedTempFile, data: &[u8]) -> Result<(), SpeechError> {
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    Ok(())
}

/// Run blocking file work off the async workers
async fn blocking<T, F>(work: F) -> Result<T, SpeechError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SpeechError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SpeechError::AudioProcessing(format!("File writer task failed: {e}")))?
}

/// Write `data` to `destination` atomically and return the byte count
pub async fn write_atomic(destination: &Path, data: Vec<u8>) -> Result<u64, SpeechError> {
    let destination = destination.to_path_buf();
    blocking(move || {
        let ext = destination
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("part");
        let mut temp = temp_file_beside(&destination, ext)?;
        write_synced(&mut temp, &data)?;

        temp.persist(&destination).map_err(|e| {
            SpeechError::AudioProcessing(format!(
                "Failed to persist {}: {}",
                destination.display(),
                e.error
            ))
        })?;

        Ok(data.len() as u64)
    })
    .await
}

/// Write `data` into a hidden temporary file beside `destination`
///
/// Nothing visible is created: the file is removed on drop unless the caller
/// persists it.
pub(crate) async fn stage_beside(
    destination: &Path,
    ext: &'static str,
    data: Vec<u8>,
) -> Result<NamedTempFile, SpeechError> {
    let destination = destination.to_path_buf();
    blocking(move || {
        let mut temp = temp_file_beside(&destination, ext)?;
        write_synced(&mut temp, &data)?;
        Ok(temp)
    })
    .await
}

/// Move a staged file to `path`, replacing whatever is there
pub(crate) fn persist_staged(staged: NamedTempFile, path: &Path) -> Result<(), SpeechError> {
    staged.persist(path).map_err(|e| {
        SpeechError::AudioProcessing(format!("Failed to persist {}: {}", path.display(), e.error))
    })?;
    Ok(())
}
