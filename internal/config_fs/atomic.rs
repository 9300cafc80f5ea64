use crate::util::config::ConfigRootBackend;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Atomic replace: write a uniquely-named temp file in the target's
/// directory, fsync it, then move it over the target. On a clustered
/// (GPFS-style) root the final replace goes through link-and-unlink
/// instead of a plain rename. Readers never observe a partial file.
pub async fn write_file_atomic(
    dir: &Path,
    name: &str,
    bytes: &[u8],
    backend: ConfigRootBackend,
    owner: Option<(u32, u32)>,
) -> io::Result<()> {
    let target = dir.join(name);
    let tmp = tmp_path(dir, name);
    let result = flush_and_replace(&tmp, &target, bytes, backend, owner).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

fn tmp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}

async fn flush_and_replace(
    tmp: &Path,
    target: &Path,
    bytes: &[u8],
    backend: ConfigRootBackend,
    owner: Option<(u32, u32)>,
) -> io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    if let Some((uid, gid)) = owner {
        chown_best_effort(tmp, uid, gid).await;
    }
    replace(tmp, target, backend).await
}

async fn replace(tmp: &Path, target: &Path, backend: ConfigRootBackend) -> io::Result<()> {
    match backend {
        ConfigRootBackend::None => tokio::fs::rename(tmp, target).await,
        ConfigRootBackend::Gpfs => {
            let tmp = tmp.to_path_buf();
            let target = target.to_path_buf();
            tokio::task::spawn_blocking(move || linkat_replace(&tmp, &target))
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
        }
    }
}

async fn chown_best_effort(path: &Path, uid: u32, gid: u32) {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || chown(&path, uid, gid)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(error = %err, "could not preserve config file owner"),
        Err(err) => tracing::debug!(error = %err, "chown task failed"),
    }
}

#[cfg(unix)]
fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let raw = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let rc = unsafe { libc::chown(raw.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn chown(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn linkat_replace(tmp: &Path, target: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let tmp_c = std::ffi::CString::new(tmp.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let target_c = std::ffi::CString::new(target.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    for _ in 0..16 {
        let rc = unsafe {
            libc::unlink(target_c.as_ptr());
            libc::linkat(
                libc::AT_FDCWD,
                tmp_c.as_ptr(),
                libc::AT_FDCWD,
                target_c.as_ptr(),
                0,
            )
        };
        if rc == 0 {
            let _ = unsafe { libc::unlink(tmp_c.as_ptr()) };
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "link replace kept losing to concurrent writers",
    ))
}

#[cfg(not(unix))]
fn linkat_replace(tmp: &Path, target: &Path) -> io::Result<()> {
    std::fs::rename(tmp, target)
}

#[cfg(test)]
mod tests {
    use super::{tmp_path, write_file_atomic};
    use crate::util::config::ConfigRootBackend;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nsfs-atomic-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        dir
    }

    #[test]
    fn tmp_names_are_unique_and_hidden() {
        let dir = PathBuf::from("/cfg");
        let first = tmp_path(&dir, "a.json");
        let second = tmp_path(&dir, "a.json");
        assert_ne!(first, second);
        let name = first.file_name().expect("name").to_string_lossy().to_string();
        assert!(name.starts_with(".a.json."));
        assert!(name.ends_with(".tmp"));
    }

    #[tokio::test]
    async fn write_creates_target_and_removes_tmp() {
        let dir = temp_dir();
        write_file_atomic(&dir, "a.json", b"{}", ConfigRootBackend::None, None)
            .await
            .expect("write");
        let content = std::fs::read_to_string(dir.join("a.json")).expect("read");
        assert_eq!(content, "{}");
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn write_replaces_existing_content_entirely() {
        let dir = temp_dir();
        write_file_atomic(&dir, "a.json", b"{\"v\":1}", ConfigRootBackend::None, None)
            .await
            .expect("first");
        write_file_atomic(&dir, "a.json", b"{\"v\":2}", ConfigRootBackend::None, None)
            .await
            .expect("second");
        let content = std::fs::read_to_string(dir.join("a.json")).expect("read");
        assert_eq!(content, "{\"v\":2}");
    }

    #[tokio::test]
    async fn write_fails_when_directory_is_missing() {
        let dir = std::env::temp_dir().join(format!("nsfs-atomic-missing-{}", Uuid::new_v4()));
        let err = write_file_atomic(&dir, "a.json", b"{}", ConfigRootBackend::None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gpfs_backend_replaces_via_link() {
        let dir = temp_dir();
        write_file_atomic(&dir, "a.json", b"{\"v\":1}", ConfigRootBackend::Gpfs, None)
            .await
            .expect("first");
        write_file_atomic(&dir, "a.json", b"{\"v\":2}", ConfigRootBackend::Gpfs, None)
            .await
            .expect("second");
        let content = std::fs::read_to_string(dir.join("a.json")).expect("read");
        assert_eq!(content, "{\"v\":2}");
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn owner_preservation_is_best_effort() {
        let dir = temp_dir();
        // Unprivileged chown to an arbitrary owner fails silently; the write
        // itself must still land.
        write_file_atomic(
            &dir,
            "a.json",
            b"{}",
            ConfigRootBackend::None,
            Some((43210, 43210)),
        )
        .await
        .expect("write");
        assert!(dir.join("a.json").exists());
    }
}
