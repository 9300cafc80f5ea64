use crate::cache::AccountCache;
use crate::config_fs::ConfigFs;
use crate::errors::{ManageError, ManageResult};
use crate::upgrade::{StartOptions, UpgradeController};
use crate::util::config::Config;
use serde_json::Value;
use std::path::PathBuf;

pub mod accounts;
pub mod buckets;
pub mod keys;
pub mod options;

use accounts::AccountManager;
use buckets::BucketManager;
use options::Options;

const UPGRADE_START_KEYS: &[&str] = &[
    "expected_version",
    "expected_hosts",
    "skip_verification",
    "custom_upgrade_scripts_dir",
];

/// The single dispatcher surface: `(type, action, options)` in, exactly
/// one of `{response: {code, reply}}` or `{error: {code, message, cause?}}`
/// out.
pub struct ManageApi {
    fs: ConfigFs,
    config: Config,
    cache: AccountCache,
}

impl ManageApi {
    pub fn new(config: Config) -> Self {
        let fs = ConfigFs::new(config.config_root.clone(), config.config_root_backend);
        Self {
            fs,
            config,
            cache: AccountCache::new(),
        }
    }

    pub fn fs(&self) -> &ConfigFs {
        &self.fs
    }

    pub async fn dispatch(&self, kind: &str, action: &str, options: Value) -> Value {
        match self.run(kind, action, options).await {
            Ok((code, reply)) => serde_json::json!({
                "response": { "code": code, "reply": reply }
            }),
            Err(err) => error_value(&err),
        }
    }

    pub async fn run(
        &self,
        kind: &str,
        action: &str,
        options: Value,
    ) -> ManageResult<(&'static str, Value)> {
        let mut options = as_options(options)?;
        if kind != "upgrade" && action == "add" {
            apply_from_file(&mut options).await?;
        }
        match kind {
            "account" => self.run_account(action, &options).await,
            "bucket" => self.run_bucket(action, &options).await,
            "upgrade" => self.run_upgrade(action, &options).await,
            other => Err(ManageError::InvalidArgument(format!(
                "unknown type: {other}"
            ))),
        }
    }

    async fn run_account(
        &self,
        action: &str,
        options: &Options,
    ) -> ManageResult<(&'static str, Value)> {
        let manager = AccountManager::new(&self.fs, &self.cache);
        match action {
            "add" => {
                self.fs.init_root().await?;
                Ok(("AccountCreated", manager.add(options).await?))
            }
            "update" => Ok(("AccountUpdated", manager.update(options).await?)),
            "delete" => Ok(("AccountDeleted", manager.delete(options).await?)),
            "status" => Ok(("AccountStatus", manager.status(options).await?)),
            "list" => Ok(("AccountList", manager.list(options).await?)),
            other => Err(ManageError::InvalidArgument(format!(
                "unknown account action: {other}"
            ))),
        }
    }

    async fn run_bucket(
        &self,
        action: &str,
        options: &Options,
    ) -> ManageResult<(&'static str, Value)> {
        let manager = BucketManager::new(&self.fs);
        match action {
            "add" => {
                self.fs.init_root().await?;
                Ok(("BucketCreated", manager.add(options).await?))
            }
            "update" => Ok(("BucketUpdated", manager.update(options).await?)),
            "delete" => Ok(("BucketDeleted", manager.delete(options).await?)),
            "status" => Ok(("BucketStatus", manager.status(options).await?)),
            "list" => Ok(("BucketList", manager.list(options).await?)),
            other => Err(ManageError::InvalidArgument(format!(
                "unknown bucket action: {other}"
            ))),
        }
    }

    async fn run_upgrade(
        &self,
        action: &str,
        options: &Options,
    ) -> ManageResult<(&'static str, Value)> {
        let controller = UpgradeController::new(&self.fs, &self.config);
        match action {
            "start" => {
                options::ensure_allowed(options, UPGRADE_START_KEYS)?;
                let start = StartOptions {
                    expected_version: options::require_str(options, "expected_version")?,
                    expected_hosts: options::require_str(options, "expected_hosts")?,
                    skip_verification: options::get_bool(options, "skip_verification")?
                        .unwrap_or(false),
                    custom_scripts_dir: options::get_str(options, "custom_upgrade_scripts_dir")?
                        .map(PathBuf::from),
                };
                Ok(("UpgradeSuccessful", controller.start(&start).await?))
            }
            "status" => {
                options::ensure_allowed(options, &[])?;
                Ok(("UpgradeStatus", controller.status().await?))
            }
            "history" => {
                options::ensure_allowed(options, &[])?;
                Ok(("UpgradeHistory", controller.history().await?))
            }
            other => Err(ManageError::InvalidUpgradeAction(other.to_string())),
        }
    }
}

/// Writers other than the upgrade itself must not mutate configs while the
/// directory phase is LOCKED.
pub async fn ensure_unlocked(fs: &ConfigFs) -> ManageResult<()> {
    match fs.read_system().await? {
        Some(system) if system.is_config_dir_locked() => Err(ManageError::AccessDenied(
            "config directory is locked for upgrade".to_string(),
        )),
        _ => Ok(()),
    }
}

pub fn error_value(err: &ManageError) -> Value {
    let mut error = serde_json::Map::new();
    error.insert("code".to_string(), Value::String(err.code().to_string()));
    error.insert("message".to_string(), Value::String(err.message()));
    if let Some(cause) = err.cause() {
        error.insert("cause".to_string(), Value::String(cause));
    }
    serde_json::json!({ "error": error })
}

fn as_options(options: Value) -> ManageResult<Options> {
    match options {
        Value::Null => Ok(Options::new()),
        Value::Object(map) => Ok(map),
        other => Err(ManageError::InvalidArgumentType(format!(
            "options must be an object, got {other}"
        ))),
    }
}

/// `--from_file` supplies the record body; explicit flags override the
/// file's fields.
async fn apply_from_file(options: &mut Options) -> ManageResult<()> {
    let path = match options.remove("from_file") {
        Some(Value::String(path)) => path,
        Some(other) => {
            return Err(ManageError::InvalidArgumentType(format!(
                "option from_file must be a string, got {other}"
            )));
        }
        None => return Ok(()),
    };
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| ManageError::InvalidArgument(format!("cannot read {path}: {err}")))?;
    let loaded: Value = serde_json::from_slice(&bytes)
        .map_err(|err| ManageError::Malformed(format!("{path}: {err}")))?;
    let base = match loaded {
        Value::Object(map) => map,
        other => {
            return Err(ManageError::Malformed(format!(
                "{path}: expected a JSON object, got {other}"
            )));
        }
    };
    for (key, value) in base {
        options.entry(key).or_insert(value);
    }
    Ok(())
}
