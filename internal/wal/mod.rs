use crate::errors::{ManageError, ManageResult};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const LOG_EXT: &str = ".log";
const GENERATION_WIDTH: usize = 16;

/// Append-only log over one directory. A single active segment receives
/// appends; `swap` seals it into a generation-numbered inactive segment;
/// `process_inactive` hands sealed segments to a processor under an
/// exclusive advisory lock.
#[derive(Clone)]
pub struct Wal {
    dir: PathBuf,
    namespace: String,
    lock: Arc<Mutex<()>>,
}

impl Wal {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}{LOG_EXT}", self.namespace))
    }

    fn inactive_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!(
            "{}.{generation:0width$}{LOG_EXT}",
            self.namespace,
            width = GENERATION_WIDTH
        ))
    }

    /// Record payloads are newline-framed; an embedded newline would split
    /// one record into two on read.
    pub async fn append(&self, record: &str) -> ManageResult<()> {
        if record.contains('\n') {
            return Err(ManageError::InvalidArgument(
                "wal records must not contain newlines".to_string(),
            ));
        }
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let active = self.active_path();
        let line = format!("{record}\n");
        tokio::task::spawn_blocking(move || append_blocking(&active, line.as_bytes()))
            .await
            .map_err(|err| std::io::Error::new(ErrorKind::Other, err))??;
        Ok(())
    }

    /// Seal the active segment. An absent or empty active file produces no
    /// inactive segment; processors never see empty files.
    pub async fn swap(&self) -> ManageResult<Option<PathBuf>> {
        let _guard = self.lock.lock().await;
        let active = self.active_path();
        let meta = match tokio::fs::metadata(&active).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if meta.len() == 0 {
            tracing::debug!(wal = %self.namespace, "active segment is empty, nothing to seal");
            return Ok(None);
        }
        let generation = self.max_generation().await?.map_or(1, |max| max + 1);
        let inactive = self.inactive_path(generation);
        tokio::fs::rename(&active, &inactive).await?;
        tracing::info!(wal = %self.namespace, segment = %inactive.display(), "sealed wal segment");
        Ok(Some(inactive))
    }

    /// Sealed segments oldest-first.
    pub async fn inactive_segments(&self) -> ManageResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(generation) = self.parse_generation(&name) {
                segments.push((generation, entry.path()));
            }
        }
        segments.sort_by_key(|(generation, _)| *generation);
        Ok(segments.into_iter().map(|(_, path)| path).collect())
    }

    /// Hand each sealed segment to `handler` under a non-blocking exclusive
    /// file lock; contended segments are skipped, never waited on. The
    /// segment is deleted only when the handler reports it fully processed.
    /// Handler failures retain the segment and surface after the pass.
    pub async fn process_inactive<F, Fut>(&self, mut handler: F) -> ManageResult<()>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = ManageResult<bool>>,
    {
        let mut first_error: Option<ManageError> = None;
        for segment in self.inactive_segments().await? {
            let lock = match SegmentLock::try_acquire(&segment).await? {
                Some(lock) => lock,
                None => {
                    tracing::debug!(segment = %segment.display(), "segment locked by another processor, skipping");
                    continue;
                }
            };
            match handler(segment.clone()).await {
                Ok(true) => {
                    tokio::fs::remove_file(&segment).await?;
                    tracing::info!(segment = %segment.display(), "wal segment processed and removed");
                }
                Ok(false) => {
                    tracing::info!(segment = %segment.display(), "wal segment retained for a future pass");
                }
                Err(err) => {
                    tracing::warn!(segment = %segment.display(), error = %err, "wal segment processing failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
            drop(lock);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn max_generation(&self) -> ManageResult<Option<u64>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut max = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(generation) = self.parse_generation(&name) {
                max = Some(max.map_or(generation, |current: u64| current.max(generation)));
            }
        }
        Ok(max)
    }

    fn parse_generation(&self, file_name: &str) -> Option<u64> {
        let prefix = format!("{}.", self.namespace);
        let middle = file_name.strip_prefix(&prefix)?.strip_suffix(LOG_EXT)?;
        if middle.len() != GENERATION_WIDTH {
            return None;
        }
        middle.parse().ok()
    }
}

#[cfg(unix)]
fn append_blocking(path: &Path, line: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    // Writers below PIPE_BUF rely on O_APPEND atomicity; anything larger
    // serialises against other processes through the advisory lock.
    if line.len() >= libc::PIPE_BUF {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let result = file.write_all(line);
        unsafe { libc::flock(fd, libc::LOCK_UN) };
        result
    } else {
        file.write_all(line)
    }
}

#[cfg(not(unix))]
fn append_blocking(path: &Path, line: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    file.write_all(line)
}

/// Whole-file exclusive advisory lock, released on Drop.
pub struct SegmentLock {
    #[allow(dead_code)]
    file: std::fs::File,
}

impl SegmentLock {
    pub async fn try_acquire(path: &Path) -> ManageResult<Option<Self>> {
        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || try_lock_blocking(&owned))
            .await
            .map_err(|err| std::io::Error::new(ErrorKind::Other, err))??;
        Ok(file.map(|file| Self { file }))
    }
}

#[cfg(unix)]
impl Drop for SegmentLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(unix)]
fn try_lock_blocking(path: &Path) -> std::io::Result<Option<std::fs::File>> {
    use std::os::unix::io::AsRawFd;

    let file = match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(Some(file));
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == ErrorKind::WouldBlock {
        return Ok(None);
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_lock_blocking(path: &Path) -> std::io::Result<Option<std::fs::File>> {
    match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Records of one sealed segment in file order. The caller holds the
/// segment lock; a trailing record without its newline is reported as
/// corruption and skipped.
pub async fn read_segment_records(path: &Path) -> ManageResult<Vec<String>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let text = String::from_utf8(bytes)
        .map_err(|_| ManageError::Malformed(format!("{}: not utf-8", path.display())))?;
    let mut records = Vec::new();
    let mut rest = text.as_str();
    while let Some(end) = rest.find('\n') {
        records.push(rest[..end].to_string());
        rest = &rest[end + 1..];
    }
    if !rest.is_empty() {
        tracing::warn!(
            segment = %path.display(),
            "segment ends with a partial record, skipping it"
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::{read_segment_records, SegmentLock, Wal};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn temp_wal() -> Wal {
        let dir = std::env::temp_dir().join(format!("nsfs-wal-{}", Uuid::new_v4()));
        Wal::new(dir, "migrate")
    }

    #[tokio::test]
    async fn append_creates_active_segment() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        wal.append("/data/b").await.expect("append");
        let content = std::fs::read_to_string(wal.active_path()).expect("read");
        assert_eq!(content, "/data/a\n/data/b\n");
    }

    #[tokio::test]
    async fn append_rejects_embedded_newline() {
        let wal = temp_wal();
        let err = wal.append("/data/a\n/data/b").await.unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[tokio::test]
    async fn append_handles_records_larger_than_pipe_buf() {
        let wal = temp_wal();
        let long = format!("/data/{}", "x".repeat(8192));
        wal.append(&long).await.expect("append");
        let records = read_segment_records(&wal.active_path()).await.expect("read");
        assert_eq!(records, vec![long]);
    }

    #[tokio::test]
    async fn swap_without_active_is_noop() {
        let wal = temp_wal();
        assert!(wal.swap().await.expect("swap").is_none());
    }

    #[tokio::test]
    async fn swap_skips_empty_active_file() {
        let wal = temp_wal();
        std::fs::create_dir_all(wal.dir()).expect("dir");
        std::fs::write(wal.active_path(), b"").expect("touch");
        assert!(wal.swap().await.expect("swap").is_none());
        assert!(wal.active_path().exists());
        assert!(wal.inactive_segments().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn swap_seals_and_generations_increase() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        let first = wal.swap().await.expect("swap").expect("sealed");
        wal.append("/data/b").await.expect("append");
        let second = wal.swap().await.expect("swap").expect("sealed");
        assert_ne!(first, second);
        let segments = wal.inactive_segments().await.expect("list");
        assert_eq!(segments, vec![first.clone(), second.clone()]);
        assert!(!wal.active_path().exists());
        // Double swap with no intervening appends adds nothing.
        assert!(wal.swap().await.expect("swap").is_none());
        assert_eq!(wal.inactive_segments().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn generations_resume_after_restart() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        wal.swap().await.expect("swap");
        // A fresh instance over the same directory keeps the sequence.
        let reopened = Wal::new(wal.dir().to_path_buf(), "migrate");
        reopened.append("/data/b").await.expect("append");
        let second = reopened.swap().await.expect("swap").expect("sealed");
        let segments = reopened.inactive_segments().await.expect("list");
        assert_eq!(segments.last().expect("last"), &second);
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn foreign_files_are_not_segments() {
        let wal = temp_wal();
        std::fs::create_dir_all(wal.dir()).expect("dir");
        std::fs::write(wal.dir().join("restore.0000000000000001.log"), b"x\n").expect("other ns");
        std::fs::write(wal.dir().join("migrate.notes"), b"x\n").expect("other ext");
        assert!(wal.inactive_segments().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn process_deletes_consumed_segments() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        wal.swap().await.expect("swap");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        wal.process_inactive(move |segment| {
            let seen = seen_clone.clone();
            async move {
                let records = read_segment_records(&segment).await?;
                seen.lock().await.extend(records);
                Ok(true)
            }
        })
        .await
        .expect("process");
        assert_eq!(seen.lock().await.clone(), vec!["/data/a".to_string()]);
        assert!(wal.inactive_segments().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn process_retains_segments_on_false() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        wal.swap().await.expect("swap");
        wal.process_inactive(|_segment| async { Ok(false) })
            .await
            .expect("process");
        assert_eq!(wal.inactive_segments().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn process_surfaces_handler_error_but_finishes_pass() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        wal.swap().await.expect("swap");
        wal.append("/data/b").await.expect("append");
        wal.swap().await.expect("swap");
        let processed = Arc::new(Mutex::new(0usize));
        let processed_clone = processed.clone();
        let mut first = true;
        let err = wal
            .process_inactive(move |_segment| {
                let processed = processed_clone.clone();
                let fail = std::mem::replace(&mut first, false);
                async move {
                    if fail {
                        Err(crate::errors::ManageError::Malformed("boom".into()))
                    } else {
                        *processed.lock().await += 1;
                        Ok(true)
                    }
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Malformed");
        assert_eq!(*processed.lock().await, 1);
        // The failed segment stays for a future pass.
        assert_eq!(wal.inactive_segments().await.expect("list").len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_skips_segments_locked_elsewhere() {
        let wal = temp_wal();
        wal.append("/data/a").await.expect("append");
        let sealed = wal.swap().await.expect("swap").expect("sealed");
        let held = SegmentLock::try_acquire(&sealed)
            .await
            .expect("acquire")
            .expect("lock");
        let visited = Arc::new(Mutex::new(0usize));
        let visited_clone = visited.clone();
        wal.process_inactive(move |_segment| {
            let visited = visited_clone.clone();
            async move {
                *visited.lock().await += 1;
                Ok(true)
            }
        })
        .await
        .expect("process");
        assert_eq!(*visited.lock().await, 0);
        drop(held);
        assert_eq!(wal.inactive_segments().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn reader_reports_partial_trailing_record() {
        let dir = std::env::temp_dir().join(format!("nsfs-wal-reader-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let segment = dir.join("migrate.0000000000000001.log");
        std::fs::write(&segment, b"/data/a\n/data/b\n/data/par").expect("write");
        let records = read_segment_records(&segment).await.expect("read");
        assert_eq!(records, vec!["/data/a".to_string(), "/data/b".to_string()]);
    }

    #[tokio::test]
    async fn reader_of_missing_segment_is_empty() {
        let missing = PathBuf::from("/tmp").join(format!("nsfs-none-{}.log", Uuid::new_v4()));
        let records = read_segment_records(&missing).await.expect("read");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_keep_record_integrity() {
        let wal = temp_wal();
        let mut handles = Vec::new();
        for task in 0..4 {
            let wal = wal.clone();
            handles.push(tokio::spawn(async move {
                for index in 0..25 {
                    wal.append(&format!("/data/t{task}-{index}"))
                        .await
                        .expect("append");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        let records = read_segment_records(&wal.active_path()).await.expect("read");
        assert_eq!(records.len(), 100);
        for record in records {
            assert!(record.starts_with("/data/t"));
        }
    }
}
