use crate::errors::{ManageError, ManageResult};
use crate::meta::models::Bucket;
use crate::wal::{read_segment_records, Wal};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};

pub const MIGRATE_WAL: &str = "migrate";
pub const RESTORE_WAL: &str = "restore";
pub const XATTR_RESTORE_ONGOING: &str = "user.nsfs.restore.ongoing";
pub const XATTR_RESTORE_EXPIRY: &str = "user.nsfs.restore.expiry";

/// Filesystem identity the backend should assume for object access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsContext {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// The tape-side implementation. `migrate` and `restore` receive a sealed
/// WAL segment and work through its records; `migrate` returns the subset
/// it failed to move.
pub trait GlacierBackend: Send + Sync {
    fn should_migrate(&self, ctx: &FsContext, path: &Path) -> ManageResult<bool>;
    fn migrate(&self, ctx: &FsContext, segment: &Path) -> ManageResult<Vec<PathBuf>>;
    fn restore(&self, ctx: &FsContext, segment: &Path) -> ManageResult<bool>;
    fn process_expired(&self, ctx: &FsContext, path: &Path) -> ManageResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStatus {
    pub ongoing: bool,
    pub expiry_time: Option<DateTime<Utc>>,
}

pub struct Glacier {
    migrate_wal: Wal,
    restore_wal: Wal,
}

impl Glacier {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            migrate_wal: Wal::new(logs_dir.to_path_buf(), MIGRATE_WAL),
            restore_wal: Wal::new(logs_dir.to_path_buf(), RESTORE_WAL),
        }
    }

    pub fn migrate_wal(&self) -> &Wal {
        &self.migrate_wal
    }

    pub fn restore_wal(&self) -> &Wal {
        &self.restore_wal
    }

    /// Called by the object layer when an upload lands with the GLACIER
    /// storage class.
    pub async fn record_upload(&self, path: &Path) -> ManageResult<()> {
        self.migrate_wal.append(&path.display().to_string()).await
    }

    /// Durably records the restore request, then marks the object as
    /// restore-in-progress.
    pub async fn restore_object(
        &self,
        bucket: &Bucket,
        key: &str,
        days: u32,
    ) -> ManageResult<PathBuf> {
        if days == 0 {
            return Err(ManageError::InvalidArgument(
                "restore days must be at least 1".to_string(),
            ));
        }
        let path = Path::new(&bucket.path).join(key);
        self.restore_wal.append(&path.display().to_string()).await?;
        set_xattr(&path, XATTR_RESTORE_ONGOING, days.to_string().as_bytes())?;
        Ok(path)
    }

    /// One migrate pass: seal the active segment, then drain every sealed
    /// segment the backend fully migrates. A segment with failures stays
    /// for the next pass; the backend's `should_migrate` pre-check makes
    /// the retry a no-op for entries that already moved.
    pub async fn run_migrations(
        &self,
        ctx: &FsContext,
        backend: &dyn GlacierBackend,
    ) -> ManageResult<()> {
        self.migrate_wal.swap().await?;
        self.migrate_wal
            .process_inactive(|segment| async move {
                let failed = backend.migrate(ctx, &segment)?;
                if !failed.is_empty() {
                    tracing::warn!(
                        segment = %segment.display(),
                        failed = failed.len(),
                        "backend failed to migrate some entries, retaining segment"
                    );
                }
                Ok(failed.is_empty())
            })
            .await
    }

    /// One restore pass. When the backend reports success the restore
    /// status of every object in the segment flips from ongoing to an
    /// expiry stamped `now + days`.
    pub async fn run_restores(
        &self,
        ctx: &FsContext,
        backend: &dyn GlacierBackend,
    ) -> ManageResult<()> {
        self.restore_wal.swap().await?;
        self.restore_wal
            .process_inactive(|segment| async move {
                if !backend.restore(ctx, &segment)? {
                    return Ok(false);
                }
                for record in read_segment_records(&segment).await? {
                    if let Err(err) = finalize_restore(Path::new(&record)) {
                        tracing::warn!(object = %record, error = %err, "could not finalize restore status");
                    }
                }
                Ok(true)
            })
            .await
    }

    /// Sweep `root` for objects whose restore window has lapsed. Removing
    /// the expiry marker after a successful callback keeps the sweep
    /// idempotent.
    pub async fn run_expiry(
        &self,
        ctx: &FsContext,
        backend: &dyn GlacierBackend,
        root: &Path,
    ) -> ManageResult<()> {
        let now = Utc::now();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let kind = entry.file_type().await?;
                if kind.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !kind.is_file() {
                    continue;
                }
                match read_restore_status(&path) {
                    Ok(status) if is_expired(&status, now) => {
                        if let Err(err) = backend.process_expired(ctx, &path) {
                            tracing::warn!(object = %path.display(), error = %err, "expiry handling failed");
                            continue;
                        }
                        remove_xattr(&path, XATTR_RESTORE_EXPIRY)?;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(object = %path.display(), error = %err, "could not read restore status");
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_expired(status: &RestoreStatus, now: DateTime<Utc>) -> bool {
    !status.ongoing && status.expiry_time.is_some_and(|expiry| expiry < now)
}

pub fn read_restore_status(path: &Path) -> ManageResult<RestoreStatus> {
    let ongoing = get_xattr(path, XATTR_RESTORE_ONGOING)?.is_some();
    let expiry_time = match get_xattr(path, XATTR_RESTORE_EXPIRY)? {
        Some(raw) => {
            let text = String::from_utf8(raw)
                .map_err(|_| ManageError::Malformed("restore expiry xattr is not utf-8".into()))?;
            Some(
                DateTime::parse_from_rfc3339(&text)
                    .map_err(|err| ManageError::Malformed(format!("restore expiry xattr: {err}")))?
                    .with_timezone(&Utc),
            )
        }
        None => None,
    };
    Ok(RestoreStatus {
        ongoing,
        expiry_time,
    })
}

fn finalize_restore(path: &Path) -> ManageResult<()> {
    let days = match get_xattr(path, XATTR_RESTORE_ONGOING)? {
        Some(raw) => String::from_utf8(raw)
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
            .ok_or_else(|| ManageError::Malformed("restore ongoing xattr is not a day count".into()))?,
        None => return Ok(()),
    };
    let expiry = Utc::now() + Duration::days(days);
    set_xattr(path, XATTR_RESTORE_EXPIRY, expiry.to_rfc3339().as_bytes())?;
    remove_xattr(path, XATTR_RESTORE_ONGOING)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_xattr(path: &Path, name: &str, value: &[u8]) -> ManageResult<()> {
    let path_c = path_cstring(path)?;
    let name_c = std::ffi::CString::new(name)
        .map_err(|_| ManageError::InvalidArgument("xattr name contains NUL".into()))?;
    let rc = unsafe {
        libc::setxattr(
            path_c.as_ptr(),
            name_c.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn get_xattr(path: &Path, name: &str) -> ManageResult<Option<Vec<u8>>> {
    let path_c = path_cstring(path)?;
    let name_c = std::ffi::CString::new(name)
        .map_err(|_| ManageError::InvalidArgument("xattr name contains NUL".into()))?;
    let size = unsafe { libc::getxattr(path_c.as_ptr(), name_c.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODATA) {
            return Ok(None);
        }
        return Err(err.into());
    }
    let mut buf = vec![0u8; size as usize];
    let read = unsafe {
        libc::getxattr(
            path_c.as_ptr(),
            name_c.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if read < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODATA) {
            return Ok(None);
        }
        return Err(err.into());
    }
    buf.truncate(read as usize);
    Ok(Some(buf))
}

#[cfg(target_os = "linux")]
fn remove_xattr(path: &Path, name: &str) -> ManageResult<()> {
    let path_c = path_cstring(path)?;
    let name_c = std::ffi::CString::new(name)
        .map_err(|_| ManageError::InvalidArgument("xattr name contains NUL".into()))?;
    let rc = unsafe { libc::removexattr(path_c.as_ptr(), name_c.as_ptr()) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENODATA) {
            return Err(err.into());
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn path_cstring(path: &Path) -> ManageResult<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;

    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ManageError::InvalidArgument("path contains NUL".into()))
}

#[cfg(not(target_os = "linux"))]
fn set_xattr(_path: &Path, _name: &str, _value: &[u8]) -> ManageResult<()> {
    Err(ManageError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "restore status xattrs require linux",
    )))
}

#[cfg(not(target_os = "linux"))]
fn get_xattr(_path: &Path, _name: &str) -> ManageResult<Option<Vec<u8>>> {
    Ok(None)
}

#[cfg(not(target_os = "linux"))]
fn remove_xattr(_path: &Path, _name: &str) -> ManageResult<()> {
    Ok(())
}
