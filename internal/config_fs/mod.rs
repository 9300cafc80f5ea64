use crate::errors::{ManageError, ManageResult};
use crate::meta::models::{Account, Bucket, SystemConfig};
use crate::util::config::ConfigRootBackend;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub mod atomic;

pub const ACCOUNTS_DIR: &str = "accounts";
pub const BUCKETS_DIR: &str = "buckets";
pub const ACCESS_KEYS_DIR: &str = "access_keys";
pub const SYSTEM_FILE: &str = "system.json";

const JSON_EXT: &str = ".json";
const SYMLINK_EXT: &str = ".symlink";

/// The config directory is the sole source of truth for control-plane
/// state. All mutations go through the atomic replace in [`atomic`].
#[derive(Debug, Clone)]
pub struct ConfigFs {
    root: PathBuf,
    backend: ConfigRootBackend,
}

impl ConfigFs {
    pub fn new(root: impl Into<PathBuf>, backend: ConfigRootBackend) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.root.join(ACCOUNTS_DIR)
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.root.join(BUCKETS_DIR)
    }

    pub fn access_keys_dir(&self) -> PathBuf {
        self.root.join(ACCESS_KEYS_DIR)
    }

    pub fn system_path(&self) -> PathBuf {
        self.root.join(SYSTEM_FILE)
    }

    pub async fn init_root(&self) -> ManageResult<()> {
        for dir in [
            self.root.clone(),
            self.accounts_dir(),
            self.buckets_dir(),
            self.access_keys_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub async fn create_config_file(
        &self,
        dir: &Path,
        name: &str,
        bytes: &[u8],
    ) -> ManageResult<()> {
        let target = dir.join(name);
        if path_exists(&target).await? {
            return Err(ManageError::AlreadyExists(display_rel(&self.root, &target)));
        }
        atomic::write_file_atomic(dir, name, bytes, self.backend, None).await?;
        Ok(())
    }

    pub async fn update_config_file(
        &self,
        dir: &Path,
        name: &str,
        bytes: &[u8],
    ) -> ManageResult<()> {
        let target = dir.join(name);
        let meta = match tokio::fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ManageError::NotFound(display_rel(&self.root, &target)));
            }
            Err(err) => return Err(err.into()),
        };
        atomic::write_file_atomic(dir, name, bytes, self.backend, file_owner(&meta)).await?;
        Ok(())
    }

    pub async fn delete_config_file(&self, dir: &Path, name: &str) -> ManageResult<()> {
        match tokio::fs::remove_file(dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn read_config_file(&self, dir: &Path, name: &str) -> ManageResult<serde_json::Value> {
        let target = dir.join(name);
        let bytes = match tokio::fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ManageError::NotFound(display_rel(&self.root, &target)));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes).map_err(|err| {
            ManageError::Malformed(format!("{}: {err}", display_rel(&self.root, &target)))
        })
    }

    /// Entries that vanish between the directory scan and the read are
    /// skipped; the directory may mutate during iteration.
    pub async fn list(&self, dir: &Path) -> ManageResult<Vec<serde_json::Value>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(JSON_EXT) && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            match self.read_config_file(dir, &name).await {
                Ok(value) => records.push(value),
                Err(ManageError::NotFound(_)) => {}
                Err(ManageError::Malformed(detail)) => {
                    tracing::warn!(%detail, "skipping malformed config file");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    pub async fn link_access_key(&self, access_key: &str, account_name: &str) -> ManageResult<()> {
        let link = self.access_key_link_path(access_key);
        let target = access_key_link_target(account_name);
        match symlink(&target, &link).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let existing = tokio::fs::read_link(&link).await?;
                if existing == target {
                    Ok(())
                } else {
                    Err(ManageError::AccessKeyAlreadyExists(access_key.to_string()))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn unlink_access_key(&self, access_key: &str) -> ManageResult<()> {
        match tokio::fs::remove_file(self.access_key_link_path(access_key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_account_by_access_key(&self, access_key: &str) -> ManageResult<Account> {
        let link = self.access_key_link_path(access_key);
        let target = match tokio::fs::read_link(&link).await {
            Ok(target) => target,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ManageError::NotFound(format!("access key {access_key}")));
            }
            Err(err) => return Err(err.into()),
        };
        let resolved = self.access_keys_dir().join(target);
        let bytes = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ManageError::NotFound(format!("access key {access_key}")));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|err| ManageError::Malformed(format!("account for {access_key}: {err}")))
    }

    pub async fn read_account(&self, name: &str) -> ManageResult<Account> {
        let value = self
            .read_config_file(&self.accounts_dir(), &json_name(name))
            .await?;
        parse_record(value, "account", name)
    }

    pub async fn write_account(&self, account: &Account, create: bool) -> ManageResult<()> {
        let bytes = to_pretty(account)?;
        let dir = self.accounts_dir();
        let name = json_name(&account.name);
        if create {
            self.create_config_file(&dir, &name, &bytes).await
        } else {
            self.update_config_file(&dir, &name, &bytes).await
        }
    }

    /// Invariant: the access-key symlinks go first, the JSON file last. An
    /// orphaned JSON file is tolerable after a crash; an orphaned symlink
    /// is not.
    pub async fn delete_account(&self, account: &Account) -> ManageResult<()> {
        for pair in &account.access_keys {
            self.unlink_access_key(&pair.access_key).await?;
        }
        self.delete_config_file(&self.accounts_dir(), &json_name(&account.name))
            .await
    }

    pub async fn list_accounts(&self) -> ManageResult<Vec<Account>> {
        let values = self.list(&self.accounts_dir()).await?;
        let mut accounts = Vec::with_capacity(values.len());
        for value in values {
            accounts.push(parse_record(value, "account", "list")?);
        }
        Ok(accounts)
    }

    pub async fn read_bucket(&self, name: &str) -> ManageResult<Bucket> {
        let value = self
            .read_config_file(&self.buckets_dir(), &json_name(name))
            .await?;
        parse_record(value, "bucket", name)
    }

    pub async fn write_bucket(&self, bucket: &Bucket, create: bool) -> ManageResult<()> {
        let bytes = to_pretty(bucket)?;
        let dir = self.buckets_dir();
        let name = json_name(&bucket.name);
        if create {
            self.create_config_file(&dir, &name, &bytes).await
        } else {
            self.update_config_file(&dir, &name, &bytes).await
        }
    }

    pub async fn delete_bucket(&self, name: &str) -> ManageResult<()> {
        self.delete_config_file(&self.buckets_dir(), &json_name(name))
            .await
    }

    pub async fn list_buckets(&self) -> ManageResult<Vec<Bucket>> {
        let values = self.list(&self.buckets_dir()).await?;
        let mut buckets = Vec::with_capacity(values.len());
        for value in values {
            buckets.push(parse_record(value, "bucket", "list")?);
        }
        Ok(buckets)
    }

    pub async fn read_system(&self) -> ManageResult<Option<SystemConfig>> {
        match self.read_config_file(&self.root, SYSTEM_FILE).await {
            Ok(value) => Ok(Some(parse_record(value, "system", SYSTEM_FILE)?)),
            Err(ManageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn write_system(&self, system: &SystemConfig) -> ManageResult<()> {
        let bytes = to_pretty(system)?;
        atomic::write_file_atomic(&self.root, SYSTEM_FILE, &bytes, self.backend, None).await?;
        Ok(())
    }

    fn access_key_link_path(&self, access_key: &str) -> PathBuf {
        self.access_keys_dir()
            .join(format!("{access_key}{SYMLINK_EXT}"))
    }
}

fn json_name(name: &str) -> String {
    format!("{name}{JSON_EXT}")
}

fn access_key_link_target(account_name: &str) -> PathBuf {
    PathBuf::from("..")
        .join(ACCOUNTS_DIR)
        .join(json_name(account_name))
}

fn to_pretty<T: serde::Serialize>(record: &T) -> ManageResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(record)
        .map_err(|err| ManageError::Malformed(err.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn parse_record<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    kind: &str,
    name: &str,
) -> ManageResult<T> {
    serde_json::from_value(value)
        .map_err(|err| ManageError::Malformed(format!("{kind} {name}: {err}")))
}

fn file_owner(meta: &std::fs::Metadata) -> Option<(u32, u32)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some((meta.uid(), meta.gid()))
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

async fn path_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "symlink indexes require a unix filesystem",
    ))
}

fn display_rel(root: &Path, target: &Path) -> String {
    target
        .strip_prefix(root)
        .unwrap_or(target)
        .display()
        .to_string()
}
