//! Private-by-default file helpers: atomic writes, 0600 files, 0700 dirs.

use std::io::Write;
use std::path::{Path, PathBuf};

pub const FILE_MODE: u32 = 0o600;
pub const DIR_MODE: u32 = 0o700;

/// Sibling temp path used by [`write_atomic`] (`<path>.tmp`).
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Write `data` to `<path>.tmp`, fsync, then rename over `path`.
///
/// Readers observe either the old file or the complete new one.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    write_private(&tmp, data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Create or truncate `path` with mode 0600, write `data` and fsync.
pub fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = open_private(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// The mode also applies to a file that already existed.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// `create_dir_all` followed by narrowing `dir` itself to 0700.
pub fn create_private_dir_all(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    narrow_mode(dir, DIR_MODE)?;
    Ok(())
}

/// Set the permission bits of `path` to `mode` if they differ.
///
/// Returns `true` when the mode was changed.
#[cfg(unix)]
pub fn narrow_mode(path: &Path, mode: u32) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let current = std::fs::metadata(path)?.permissions().mode() & 0o777;
    if current == mode {
        return Ok(false);
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn narrow_mode(_path: &Path, _mode: u32) -> std::io::Result<bool> {
    Ok(false)
}

/// Read a file, mapping "does not exist" to `Ok(None)`.
pub fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
