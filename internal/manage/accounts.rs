use super::options::{self, Options};
use super::{ensure_unlocked, keys};
use crate::cache::AccountCache;
use crate::config_fs::ConfigFs;
use crate::errors::{ManageError, ManageResult};
use crate::identity::{self, ResolvedIdentity};
use crate::meta::models::{AccessKeyPair, Account, NsfsAccountConfig};
use chrono::Utc;
use serde_json::Value;
use std::path::Path;

const ADD_KEYS: &[&str] = &[
    "name",
    "email",
    "uid",
    "gid",
    "user",
    "access_key",
    "secret_key",
    "new_buckets_path",
    "allow_bucket_creation",
];
const UPDATE_KEYS: &[&str] = &[
    "name",
    "email",
    "uid",
    "gid",
    "user",
    "access_key",
    "secret_key",
    "new_buckets_path",
    "allow_bucket_creation",
    "regenerate",
];
const DELETE_KEYS: &[&str] = &["name"];
const STATUS_KEYS: &[&str] = &["name", "access_key"];
const LIST_KEYS: &[&str] = &["uid", "gid", "user", "access_key", "name", "wide"];

pub struct AccountManager<'a> {
    fs: &'a ConfigFs,
    cache: &'a AccountCache,
}

impl<'a> AccountManager<'a> {
    pub fn new(fs: &'a ConfigFs, cache: &'a AccountCache) -> Self {
        Self { fs, cache }
    }

    pub async fn add(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, ADD_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        let identity_config = parse_identity_options(options, None)?;
        let identity = resolve_identity(&identity_config)?;
        let key_pair = match parse_key_pair(options)? {
            Some(pair) => pair,
            None => generated_pair(),
        };
        ensure_unlocked(self.fs).await?;
        identity::probe_access(Path::new(&identity_config.new_buckets_path), identity).await?;

        if self.fs.read_account(&name).await.is_ok() {
            return Err(ManageError::AlreadyExists(format!("account {name}")));
        }
        self.ensure_access_key_free(&key_pair.access_key, None).await?;

        let account = Account {
            id: keys::new_record_id(),
            name: name.clone(),
            email: options::get_str(options, "email")?,
            creation_date: Utc::now(),
            access_keys: vec![key_pair],
            nsfs_account_config: identity_config,
            allow_bucket_creation: options::get_bool(options, "allow_bucket_creation")?,
        };
        self.fs.write_account(&account, true).await?;
        if let Err(err) = self.link_keys(&account).await {
            // Losing the symlink race undoes the half-created account.
            let _ = self.fs.delete_account(&account).await;
            return Err(err);
        }
        tracing::info!(account = %account.name, "account created");
        record_to_value(&account)
    }

    pub async fn update(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, UPDATE_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        ensure_unlocked(self.fs).await?;
        let existing = self.fs.read_account(&name).await?;
        let mut updated = existing.clone();

        if let Some(email) = options::get_str(options, "email")? {
            updated.email = Some(email);
        }
        if let Some(allow) = options::get_bool(options, "allow_bucket_creation")? {
            updated.allow_bucket_creation = Some(allow);
        }
        if has_identity_options(options) {
            updated.nsfs_account_config =
                parse_identity_options(options, Some(&existing.nsfs_account_config))?;
        } else if let Some(path) = options::get_str(options, "new_buckets_path")? {
            updated.nsfs_account_config.new_buckets_path = path;
        }
        apply_key_rotation(options, &mut updated)?;

        let identity = resolve_identity(&updated.nsfs_account_config)?;
        identity::probe_access(
            Path::new(&updated.nsfs_account_config.new_buckets_path),
            identity,
        )
        .await?;
        for pair in &updated.access_keys {
            if !existing.has_access_key(&pair.access_key) {
                self.ensure_access_key_free(&pair.access_key, Some(&existing.name))
                    .await?;
            }
        }

        self.fs.write_account(&updated, false).await?;
        for pair in &existing.access_keys {
            if !updated.has_access_key(&pair.access_key) {
                self.fs.unlink_access_key(&pair.access_key).await?;
            }
        }
        self.link_keys(&updated).await?;
        self.cache.invalidate(&updated.id);
        tracing::info!(account = %updated.name, "account updated");
        record_to_value(&updated)
    }

    pub async fn delete(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, DELETE_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        ensure_unlocked(self.fs).await?;
        let account = self.fs.read_account(&name).await?;
        let buckets = self.fs.list_buckets().await?;
        if buckets.iter().any(|bucket| bucket.owner_account == account.id) {
            return Err(ManageError::AccountDeleteForbiddenHasBuckets(name));
        }
        self.fs.delete_account(&account).await?;
        self.cache.invalidate(&account.id);
        tracing::info!(account = %account.name, "account deleted");
        Ok(serde_json::json!({ "name": account.name }))
    }

    pub async fn status(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, STATUS_KEYS)?;
        let account = if let Some(name) = options::get_str(options, "name")? {
            self.fs.read_account(&name).await?
        } else if let Some(access_key) = options::get_str(options, "access_key")? {
            self.fs.get_account_by_access_key(&access_key).await?
        } else {
            return Err(ManageError::MissingIdentifier("name".to_string()));
        };
        record_to_value(&account)
    }

    pub async fn list(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, LIST_KEYS)?;
        let filter = ListFilter::parse(options)?;
        let wide = options::get_bool(options, "wide")?.unwrap_or(false);
        let accounts = self.fs.list_accounts().await?;
        let matching: Vec<&Account> = accounts
            .iter()
            .filter(|account| filter.matches(account))
            .collect();
        if wide {
            let records: Result<Vec<Value>, _> =
                matching.iter().copied().map(record_to_value).collect();
            Ok(Value::Array(records?))
        } else {
            Ok(Value::Array(
                matching
                    .iter()
                    .map(|account| Value::String(account.name.clone()))
                    .collect(),
            ))
        }
    }

    async fn ensure_access_key_free(
        &self,
        access_key: &str,
        owner: Option<&str>,
    ) -> ManageResult<()> {
        match self.fs.get_account_by_access_key(access_key).await {
            Ok(existing) if Some(existing.name.as_str()) != owner => Err(
                ManageError::AccessKeyAlreadyExists(access_key.to_string()),
            ),
            Ok(_) => Ok(()),
            Err(ManageError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn link_keys(&self, account: &Account) -> ManageResult<()> {
        for pair in &account.access_keys {
            self.fs
                .link_access_key(&pair.access_key, &account.name)
                .await?;
        }
        Ok(())
    }
}

struct ListFilter {
    uid: Option<u32>,
    gid: Option<u32>,
    user: Option<String>,
    access_key: Option<String>,
    name: Option<String>,
}

impl ListFilter {
    fn parse(options: &Options) -> ManageResult<Self> {
        Ok(Self {
            uid: options::get_u32(options, "uid")?,
            gid: options::get_u32(options, "gid")?,
            user: options::get_str(options, "user")?,
            access_key: options::get_str(options, "access_key")?,
            name: options::get_str(options, "name")?,
        })
    }

    fn matches(&self, account: &Account) -> bool {
        let config = &account.nsfs_account_config;
        if self.uid.is_some() && config.uid != self.uid {
            return false;
        }
        if self.gid.is_some() && config.gid != self.gid {
            return false;
        }
        if let Some(user) = &self.user {
            if config.distinguished_name.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(access_key) = &self.access_key {
            if !account.has_access_key(access_key) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &account.name != name {
                return false;
            }
        }
        true
    }
}

/// Exactly one identity form: `{uid, gid}` or `distinguished_name`. On
/// update, supplying any identity option replaces the whole form.
fn parse_identity_options(
    options: &Options,
    existing: Option<&NsfsAccountConfig>,
) -> ManageResult<NsfsAccountConfig> {
    let uid = options::get_u32(options, "uid")?;
    let gid = options::get_u32(options, "gid")?;
    let user = options::get_str(options, "user")?;
    let new_buckets_path = match options::get_str(options, "new_buckets_path")? {
        Some(path) => path,
        None => match existing {
            Some(config) => config.new_buckets_path.clone(),
            None => return Err(ManageError::InvalidArgument(
                "option new_buckets_path is required".to_string(),
            )),
        },
    };
    if new_buckets_path.trim().is_empty() {
        return Err(ManageError::InvalidArgument(
            "new_buckets_path must not be empty".to_string(),
        ));
    }
    match (uid, gid, &user) {
        (None, None, Some(name)) => Ok(NsfsAccountConfig {
            uid: None,
            gid: None,
            distinguished_name: Some(name.clone()),
            new_buckets_path,
        }),
        (Some(uid), Some(gid), None) => Ok(NsfsAccountConfig {
            uid: Some(uid),
            gid: Some(gid),
            distinguished_name: None,
            new_buckets_path,
        }),
        (None, None, None) => Err(ManageError::InvalidArgument(
            "either uid and gid or a distinguished user name is required".to_string(),
        )),
        (_, _, Some(_)) => Err(ManageError::InvalidArgument(
            "uid/gid and a distinguished user name are mutually exclusive".to_string(),
        )),
        _ => Err(ManageError::InvalidArgument(
            "uid and gid must be provided together".to_string(),
        )),
    }
}

fn has_identity_options(options: &Options) -> bool {
    options.contains_key("uid") || options.contains_key("gid") || options.contains_key("user")
}

fn resolve_identity(config: &NsfsAccountConfig) -> ManageResult<ResolvedIdentity> {
    match (&config.distinguished_name, config.uid, config.gid) {
        (Some(name), _, _) => identity::resolve_distinguished_name(name),
        (None, Some(uid), Some(gid)) => Ok(ResolvedIdentity { uid, gid }),
        _ => Err(ManageError::InvalidArgument(
            "account carries no usable identity".to_string(),
        )),
    }
}

fn parse_key_pair(options: &Options) -> ManageResult<Option<AccessKeyPair>> {
    let access_key = options::get_str(options, "access_key")?;
    let secret_key = options::get_str(options, "secret_key")?;
    match (access_key, secret_key) {
        (None, None) => Ok(None),
        (Some(access_key), Some(secret_key)) => {
            if !keys::is_valid_access_key(&access_key) {
                return Err(ManageError::AccountAccessKeyFlagComplexity);
            }
            if !keys::is_valid_secret_key(&secret_key) {
                return Err(ManageError::AccountSecretKeyFlagComplexity);
            }
            Ok(Some(AccessKeyPair {
                access_key,
                secret_key,
            }))
        }
        _ => Err(ManageError::InvalidArgument(
            "access_key and secret_key must be provided together".to_string(),
        )),
    }
}

fn apply_key_rotation(options: &Options, account: &mut Account) -> ManageResult<()> {
    let regenerate = options::get_bool(options, "regenerate")?.unwrap_or(false);
    let explicit = parse_key_pair(options)?;
    if regenerate && explicit.is_some() {
        return Err(ManageError::InvalidArgument(
            "regenerate cannot be combined with explicit keys".to_string(),
        ));
    }
    if regenerate {
        account.access_keys = vec![generated_pair()];
    } else if let Some(pair) = explicit {
        account.access_keys = vec![pair];
    }
    Ok(())
}

fn generated_pair() -> AccessKeyPair {
    AccessKeyPair {
        access_key: keys::generate_access_key(),
        secret_key: keys::generate_secret_key(),
    }
}

fn record_to_value(account: &Account) -> ManageResult<Value> {
    serde_json::to_value(account).map_err(|err| ManageError::Malformed(err.to_string()))
}
