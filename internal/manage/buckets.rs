use super::options::{self, Options};
use super::{ensure_unlocked, keys};
use crate::config_fs::ConfigFs;
use crate::errors::{ManageError, ManageResult};
use crate::meta::models::{Bucket, Versioning};
use chrono::Utc;
use serde_json::Value;

const ADD_KEYS: &[&str] = &[
    "name",
    "owner_account",
    "path",
    "versioning",
    "fs_backend",
    "tag",
    "should_create_underlying_storage",
];
const UPDATE_KEYS: &[&str] = &["name", "path", "versioning", "fs_backend", "tag"];
const DELETE_KEYS: &[&str] = &["name"];
const STATUS_KEYS: &[&str] = &["name"];
const LIST_KEYS: &[&str] = &["name", "wide"];

pub struct BucketManager<'a> {
    fs: &'a ConfigFs,
}

impl<'a> BucketManager<'a> {
    pub fn new(fs: &'a ConfigFs) -> Self {
        Self { fs }
    }

    pub async fn add(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, ADD_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        let owner_name = options::require_str(options, "owner_account")?;
        let path = options::require_str(options, "path")?;
        let versioning = parse_versioning(options)?.unwrap_or_default();
        let create_storage =
            options::get_bool(options, "should_create_underlying_storage")?.unwrap_or(false);
        ensure_unlocked(self.fs).await?;

        let owner = self.fs.read_account(&owner_name).await?;
        if create_storage {
            tokio::fs::create_dir_all(&path).await?;
        }
        ensure_directory(&path).await?;
        if self.fs.read_bucket(&name).await.is_ok() {
            return Err(ManageError::AlreadyExists(format!("bucket {name}")));
        }

        let bucket = Bucket {
            id: keys::new_record_id(),
            name: name.clone(),
            system_owner: owner.name.clone(),
            bucket_owner: owner.name.clone(),
            owner_account: owner.id.clone(),
            versioning,
            path,
            should_create_underlying_storage: create_storage,
            creation_date: Utc::now(),
            tag: options::get_str(options, "tag")?,
            s3_policy: None,
            encryption: None,
            website: None,
            fs_backend: options::get_str(options, "fs_backend")?,
        };
        self.fs.write_bucket(&bucket, true).await?;
        tracing::info!(bucket = %bucket.name, owner = %bucket.bucket_owner, "bucket created");
        record_to_value(&bucket)
    }

    pub async fn update(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, UPDATE_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        ensure_unlocked(self.fs).await?;
        let mut bucket = self.fs.read_bucket(&name).await?;

        if let Some(path) = options::get_str(options, "path")? {
            ensure_directory(&path).await?;
            bucket.path = path;
        }
        if let Some(versioning) = parse_versioning(options)? {
            bucket.versioning = versioning;
        }
        if let Some(fs_backend) = options::get_str(options, "fs_backend")? {
            bucket.fs_backend = Some(fs_backend);
        }
        if let Some(tag) = options::get_str(options, "tag")? {
            bucket.tag = Some(tag);
        }
        self.fs.write_bucket(&bucket, false).await?;
        tracing::info!(bucket = %bucket.name, "bucket updated");
        record_to_value(&bucket)
    }

    pub async fn delete(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, DELETE_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        ensure_unlocked(self.fs).await?;
        let bucket = self.fs.read_bucket(&name).await?;
        self.fs.delete_bucket(&bucket.name).await?;
        tracing::info!(bucket = %bucket.name, "bucket deleted");
        Ok(serde_json::json!({ "name": bucket.name }))
    }

    pub async fn status(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, STATUS_KEYS)?;
        let name = options::require_identifier(options, "name")?;
        let bucket = self.fs.read_bucket(&name).await?;
        record_to_value(&bucket)
    }

    pub async fn list(&self, options: &Options) -> ManageResult<Value> {
        options::ensure_allowed(options, LIST_KEYS)?;
        let name = options::get_str(options, "name")?;
        let wide = options::get_bool(options, "wide")?.unwrap_or(false);
        let buckets = self.fs.list_buckets().await?;
        let matching: Vec<&Bucket> = buckets
            .iter()
            .filter(|bucket| name.as_deref().map_or(true, |wanted| bucket.name == wanted))
            .collect();
        if wide {
            let records: Result<Vec<Value>, _> =
                matching.iter().copied().map(record_to_value).collect();
            Ok(Value::Array(records?))
        } else {
            Ok(Value::Array(
                matching
                    .iter()
                    .map(|bucket| Value::String(bucket.name.clone()))
                    .collect(),
            ))
        }
    }
}

async fn ensure_directory(path: &str) -> ManageResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ManageError::InvalidArgument(format!(
            "bucket path is not a directory: {path}"
        ))),
        Err(_) => Err(ManageError::InvalidArgument(format!(
            "bucket path does not exist: {path}"
        ))),
    }
}

fn parse_versioning(options: &Options) -> ManageResult<Option<Versioning>> {
    match options::get_str(options, "versioning")? {
        None => Ok(None),
        Some(raw) => Versioning::parse(&raw).map(Some).ok_or_else(|| {
            ManageError::InvalidArgument(format!(
                "versioning must be DISABLED, ENABLED or SUSPENDED, got {raw}"
            ))
        }),
    }
}

fn record_to_value(bucket: &Bucket) -> ManageResult<Value> {
    serde_json::to_value(bucket).map_err(|err| ManageError::Malformed(err.to_string()))
}
