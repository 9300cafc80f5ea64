use crate::errors::{ManageError, ManageResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Resolve a distinguished name through the host's user database.
pub fn resolve_distinguished_name(name: &str) -> ManageResult<ResolvedIdentity> {
    lookup_user(name)?.ok_or_else(|| ManageError::InvalidAccountDistinguishedName(name.to_string()))
}

/// Probe `path` for read and write access under `identity`, restoring the
/// caller's filesystem identity on every exit path. The probe runs on a
/// blocking thread: `setfsuid`/`setfsgid` are per-thread, so the switch
/// never leaks into other tasks.
pub async fn probe_access(path: &Path, identity: ResolvedIdentity) -> ManageResult<()> {
    let display = path.display().to_string();
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(_) => return Err(ManageError::InaccessibleAccountNewBucketsPath(display)),
    };
    if !meta.is_dir() {
        return Err(ManageError::InaccessibleAccountNewBucketsPath(display));
    }
    let owned = path.to_path_buf();
    let accessible = tokio::task::spawn_blocking(move || probe_blocking(&owned, identity))
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    if accessible? {
        Ok(())
    } else {
        Err(ManageError::InaccessibleAccountNewBucketsPath(display))
    }
}

#[cfg(unix)]
fn probe_blocking(path: &PathBuf, identity: ResolvedIdentity) -> std::io::Result<bool> {
    let current = current_identity();
    if identity == current {
        return eaccess(path);
    }
    #[cfg(target_os = "linux")]
    if let Ok(_guard) = ScopedFsIdentity::acquire(identity) {
        return faccess(path);
    }
    mode_bits_allow(path, identity)
}

#[cfg(not(unix))]
fn probe_blocking(_path: &PathBuf, _identity: ResolvedIdentity) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(unix)]
pub fn current_identity() -> ResolvedIdentity {
    ResolvedIdentity {
        uid: unsafe { libc::geteuid() },
        gid: unsafe { libc::getegid() },
    }
}

#[cfg(not(unix))]
pub fn current_identity() -> ResolvedIdentity {
    ResolvedIdentity { uid: 0, gid: 0 }
}

/// Per-thread filesystem identity. Acquire switches fsgid then fsuid;
/// Drop restores both. Requires privilege; the caller falls back to a
/// mode-bit check when acquisition fails.
#[cfg(target_os = "linux")]
struct ScopedFsIdentity {
    prev_uid: libc::uid_t,
    prev_gid: libc::gid_t,
}

#[cfg(target_os = "linux")]
impl ScopedFsIdentity {
    fn acquire(identity: ResolvedIdentity) -> std::io::Result<Self> {
        let prev_gid = unsafe { libc::setfsgid(identity.gid) } as libc::gid_t;
        let now_gid = unsafe { libc::setfsgid(identity.gid) } as libc::gid_t;
        if now_gid != identity.gid {
            unsafe { libc::setfsgid(prev_gid) };
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "setfsgid was refused",
            ));
        }
        let prev_uid = unsafe { libc::setfsuid(identity.uid) } as libc::uid_t;
        let now_uid = unsafe { libc::setfsuid(identity.uid) } as libc::uid_t;
        if now_uid != identity.uid {
            unsafe {
                libc::setfsuid(prev_uid);
                libc::setfsgid(prev_gid);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "setfsuid was refused",
            ));
        }
        Ok(Self { prev_uid, prev_gid })
    }
}

#[cfg(target_os = "linux")]
impl Drop for ScopedFsIdentity {
    fn drop(&mut self) {
        unsafe {
            libc::setfsuid(self.prev_uid);
            libc::setfsgid(self.prev_gid);
        }
    }
}

#[cfg(target_os = "linux")]
fn faccess(path: &Path) -> std::io::Result<bool> {
    access_with_flags(path, 0)
}

#[cfg(unix)]
fn eaccess(path: &Path) -> std::io::Result<bool> {
    access_with_flags(path, libc::AT_EACCESS)
}

#[cfg(unix)]
fn access_with_flags(path: &Path, flags: libc::c_int) -> std::io::Result<bool> {
    use std::os::unix::ffi::OsStrExt;

    let raw = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mode = libc::R_OK | libc::W_OK | libc::X_OK;
    let rc = unsafe { libc::faccessat(libc::AT_FDCWD, raw.as_ptr(), mode, flags) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::ENOENT) => Ok(false),
        _ => Err(err),
    }
}

/// Unprivileged fallback: decide from the directory's permission bits.
/// Supplementary groups are not consulted.
#[cfg(unix)]
fn mode_bits_allow(path: &Path, identity: ResolvedIdentity) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    if identity.uid == 0 {
        return Ok(true);
    }
    let meta = std::fs::metadata(path)?;
    let mode = meta.mode();
    let bits = if meta.uid() == identity.uid {
        (mode >> 6) & 0o7
    } else if meta.gid() == identity.gid {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    Ok(bits & 0o7 == 0o7)
}

#[cfg(unix)]
fn lookup_user(name: &str) -> ManageResult<Option<ResolvedIdentity>> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| ManageError::InvalidAccountDistinguishedName(name.to_string()))?;
    let mut buf = vec![0u8; 4096];
    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(ManageError::Io(std::io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Ok(None);
        }
        return Ok(Some(ResolvedIdentity {
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        }));
    }
}

#[cfg(not(unix))]
fn lookup_user(_name: &str) -> ManageResult<Option<ResolvedIdentity>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::{current_identity, probe_access, resolve_distinguished_name, ResolvedIdentity};
    use uuid::Uuid;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("nsfs-identity-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        dir
    }

    #[cfg(unix)]
    #[test]
    fn resolves_root() {
        let identity = resolve_distinguished_name("root").expect("root exists");
        assert_eq!(identity.uid, 0);
        assert_eq!(identity.gid, 0);
    }

    #[test]
    fn unresolvable_name_is_rejected() {
        let err = resolve_distinguished_name("nsfs-no-such-user-83b1").unwrap_err();
        assert_eq!(err.code(), "InvalidAccountDistinguishedName");
    }

    #[tokio::test]
    async fn probe_succeeds_for_current_identity() {
        let dir = temp_dir();
        probe_access(&dir, current_identity()).await.expect("probe");
    }

    #[tokio::test]
    async fn probe_rejects_missing_path() {
        let missing = std::env::temp_dir().join(format!("nsfs-missing-{}", Uuid::new_v4()));
        let err = probe_access(&missing, current_identity()).await.unwrap_err();
        assert_eq!(err.code(), "InaccessibleAccountNewBucketsPath");
    }

    #[tokio::test]
    async fn probe_rejects_plain_file() {
        let dir = temp_dir();
        let file = dir.join("object");
        std::fs::write(&file, b"data").expect("write");
        let err = probe_access(&file, current_identity()).await.unwrap_err();
        assert_eq!(err.code(), "InaccessibleAccountNewBucketsPath");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_rejects_foreign_identity_on_private_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).expect("chmod");
        let foreign = ResolvedIdentity {
            uid: 43210,
            gid: 43210,
        };
        let err = probe_access(&dir, foreign).await.unwrap_err();
        assert_eq!(err.code(), "InaccessibleAccountNewBucketsPath");
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).expect("restore");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_allows_world_writable_dir_for_foreign_identity() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o777)).expect("chmod");
        let foreign = ResolvedIdentity {
            uid: 43210,
            gid: 43210,
        };
        probe_access(&dir, foreign).await.expect("probe");
    }
}
