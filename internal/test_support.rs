use crate::config_fs::ConfigFs;
use crate::manage::keys;
use crate::meta::models::{
    Account, AccessKeyPair, Bucket, ConfigDirectory, HostRecord, InProgressUpgrade,
    NsfsAccountConfig, Phase, SystemConfig, UpgradeHistory, Versioning,
};
use crate::util::config::{Config, ConfigRootBackend, CONFIG_DIR_VERSION};
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4()))
}

pub async fn setup_config_fs() -> (ConfigFs, PathBuf) {
    let root = temp_dir("nsfs-config");
    let fs = ConfigFs::new(root.clone(), ConfigRootBackend::None);
    fs.init_root().await.expect("init config root");
    (fs, root)
}

pub fn test_config(root: &Path) -> Config {
    Config {
        config_root: root.to_path_buf(),
        config_root_backend: ConfigRootBackend::None,
        glacier_logs_dir: root.join("wal"),
        custom_upgrade_scripts_dir: None,
        package_version: "5.18.0".to_string(),
        hostname: "h1".to_string(),
    }
}

pub fn sample_account(name: &str) -> Account {
    Account {
        id: keys::new_record_id(),
        name: name.to_string(),
        email: None,
        creation_date: Utc::now(),
        access_keys: vec![AccessKeyPair {
            access_key: keys::generate_access_key(),
            secret_key: keys::generate_secret_key(),
        }],
        nsfs_account_config: NsfsAccountConfig {
            uid: Some(1001),
            gid: Some(1001),
            distinguished_name: None,
            new_buckets_path: "/tmp".to_string(),
        },
        allow_bucket_creation: Some(true),
    }
}

pub fn sample_bucket(name: &str, owner_id: &str, path: &str) -> Bucket {
    Bucket {
        id: keys::new_record_id(),
        name: name.to_string(),
        system_owner: "a1".to_string(),
        bucket_owner: "a1".to_string(),
        owner_account: owner_id.to_string(),
        versioning: Versioning::Disabled,
        path: path.to_string(),
        should_create_underlying_storage: false,
        creation_date: Utc::now(),
        tag: None,
        s3_policy: None,
        encryption: None,
        website: None,
        fs_backend: None,
    }
}

pub fn sample_system(hosts: &[(&str, &str)]) -> SystemConfig {
    SystemConfig {
        config_directory: None,
        hosts: hosts
            .iter()
            .map(|(host, version)| {
                (
                    host.to_string(),
                    HostRecord {
                        current_version: version.to_string(),
                        upgrade_history: None,
                    },
                )
            })
            .collect(),
    }
}

pub fn unlocked_config_dir(version: &str) -> ConfigDirectory {
    ConfigDirectory {
        config_dir_version: version.to_string(),
        phase: Phase::Unlocked,
        in_progress_upgrade: None,
        upgrade_history: UpgradeHistory::default(),
    }
}

/// Seeds a system.json whose config directory is mid-upgrade on another
/// host, which refuses every non-upgrade writer.
pub async fn lock_config_dir(fs: &ConfigFs) {
    let mut system = sample_system(&[("h1", "5.18.0")]);
    system.config_directory = Some(ConfigDirectory {
        config_dir_version: "0.0.0".to_string(),
        phase: Phase::Locked,
        in_progress_upgrade: Some(InProgressUpgrade {
            start_timestamp: Utc::now().timestamp_millis(),
            running_host: "h9".to_string(),
            package_from_version: "5.17.0".to_string(),
            package_to_version: "5.18.0".to_string(),
            config_dir_from_version: "0.0.0".to_string(),
            config_dir_to_version: CONFIG_DIR_VERSION.to_string(),
            completed_scripts: Vec::new(),
            error: None,
        }),
        upgrade_history: UpgradeHistory::default(),
    });
    fs.write_system(&system).await.expect("lock config dir");
}

#[cfg(unix)]
pub fn write_upgrade_script(scripts_dir: &Path, version: &str, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let version_dir = scripts_dir.join(version);
    std::fs::create_dir_all(&version_dir).expect("version dir");
    let path = version_dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}
