use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const RECORD_FILE_MODE: u32 = 0o600;
const RECORD_DIR_MODE: u32 = 0o700;

/// Ensures the record directory exists and has owner-only permissions.
///
/// # Errors
/// Returns an error if the directory cannot be created or permissions cannot be set.
pub async fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create record dir {}: {e}", path.display()))?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(RECORD_DIR_MODE))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to set record dir permissions: {e}"))?;
    Ok(())
}

/// Writes `contents` to a file that must not exist yet, readable by the owner only.
///
/// Returns `Ok(false)` without touching anything if the file already exists.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub async fn write_new_private_file(path: &Path, contents: &[u8]) -> Result<bool> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Record path has no parent directory"))?;
    ensure_private_dir(dir).await?;

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(RECORD_FILE_MODE)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(anyhow::anyhow!(
                "Failed to create record file {}: {err}",
                path.display()
            ));
        }
    };
    file.write_all(contents)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write record file: {e}"))?;
    file.sync_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to sync record file: {e}"))?;
    Ok(true)
}
