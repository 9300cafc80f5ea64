use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyPair {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsfsAccountConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinguished_name: Option<String>,
    pub new_buckets_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub access_keys: Vec<AccessKeyPair>,
    pub nsfs_account_config: NsfsAccountConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_bucket_creation: Option<bool>,
}

impl Account {
    pub fn has_access_key(&self, access_key: &str) -> bool {
        self.access_keys
            .iter()
            .any(|pair| pair.access_key == access_key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Versioning {
    #[default]
    Disabled,
    Enabled,
    Suspended,
}

impl Versioning {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DISABLED" => Some(Self::Disabled),
            "ENABLED" => Some(Self::Enabled),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub system_owner: String,
    pub bucket_owner: String,
    pub owner_account: String,
    pub versioning: Versioning,
    pub path: String,
    pub should_create_underlying_storage: bool,
    pub creation_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_policy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "CONFIG_DIR_LOCKED")]
    Locked,
    #[serde(rename = "CONFIG_DIR_UNLOCKED")]
    Unlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProgressUpgrade {
    pub start_timestamp: i64,
    pub running_host: String,
    pub package_from_version: String,
    pub package_to_version: String,
    pub config_dir_from_version: String,
    pub config_dir_to_version: String,
    #[serde(default)]
    pub completed_scripts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// History entries keep both the package version pair and the config-dir
/// version pair; operator tooling reads both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessfulUpgrade {
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_host: Option<String>,
    pub from_version: String,
    pub to_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir_from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir_to_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_scripts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeHistory {
    #[serde(default)]
    pub successful_upgrades: Vec<SuccessfulUpgrade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub current_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_history: Option<UpgradeHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDirectory {
    pub config_dir_version: String,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress_upgrade: Option<InProgressUpgrade>,
    #[serde(default)]
    pub upgrade_history: UpgradeHistory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_directory: Option<ConfigDirectory>,
    #[serde(flatten)]
    pub hosts: BTreeMap<String, HostRecord>,
}

impl SystemConfig {
    pub fn is_config_dir_locked(&self) -> bool {
        matches!(
            self.config_directory,
            Some(ConfigDirectory {
                phase: Phase::Locked,
                ..
            })
        )
    }
}
