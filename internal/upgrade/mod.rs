use crate::config_fs::ConfigFs;
use crate::errors::{ManageError, ManageResult};
use crate::meta::models::{
    ConfigDirectory, InProgressUpgrade, Phase, SuccessfulUpgrade, SystemConfig, UpgradeHistory,
};
use crate::util::config::{Config, CONFIG_DIR_VERSION};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub mod scripts;
pub mod version;

use version::PackageVersion;

const FRESH_CONFIG_DIR_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub expected_version: String,
    pub expected_hosts: String,
    pub skip_verification: bool,
    pub custom_scripts_dir: Option<PathBuf>,
}

/// Drives the config-directory schema upgrade. The `phase` field in
/// `system.json` is the cluster-wide latch: the transition to LOCKED is
/// written through the atomic rename, and a second starter that observes
/// LOCKED refuses.
pub struct UpgradeController<'a> {
    fs: &'a ConfigFs,
    config: &'a Config,
}

impl<'a> UpgradeController<'a> {
    pub fn new(fs: &'a ConfigFs, config: &'a Config) -> Self {
        Self { fs, config }
    }

    pub async fn start(&self, options: &StartOptions) -> ManageResult<serde_json::Value> {
        let mut system = self.read_system_for_start().await?;
        if options.skip_verification {
            tracing::warn!("skipping upgrade verification on operator request");
        } else {
            self.verify(&system, options)?;
        }

        let current_raw = current_config_dir_version(&system);
        let current = PackageVersion::parse(&current_raw)?;
        let target = PackageVersion::parse(CONFIG_DIR_VERSION)?;
        if version::compare(&current, &target) == Ordering::Equal {
            return Ok(serde_json::json!({
                "message": format!(
                    "config_dir_version {current_raw} and expected version {CONFIG_DIR_VERSION} match, nothing to upgrade"
                )
            }));
        }
        if version::compare(&current, &target) == Ordering::Greater {
            return Err(ManageError::UpgradeFailed {
                cause: format!(
                    "config directory is at {current_raw}, newer than this package's {CONFIG_DIR_VERSION}"
                ),
            });
        }

        let in_progress = self.acquire_latch(&mut system, &current_raw).await?;
        self.run_locked(system, in_progress, &current, &target, options)
            .await
    }

    pub async fn status(&self) -> ManageResult<serde_json::Value> {
        let system = self
            .fs
            .read_system()
            .await?
            .ok_or_else(|| ManageError::UpgradeStatusFailed("system does not exist".to_string()))?;
        match system
            .config_directory
            .and_then(|dir| dir.in_progress_upgrade)
        {
            Some(in_progress) => to_value(&in_progress),
            None => Ok(serde_json::json!({
                "message": "there is no in-progress config directory upgrade"
            })),
        }
    }

    pub async fn history(&self) -> ManageResult<serde_json::Value> {
        let system = self
            .fs
            .read_system()
            .await?
            .ok_or_else(|| ManageError::UpgradeHistoryFailed("system does not exist".to_string()))?;
        match system.config_directory.map(|dir| dir.upgrade_history) {
            Some(history) if !history.successful_upgrades.is_empty() => to_value(&history),
            _ => Ok(serde_json::json!({
                "message": "config directory upgrade history is empty"
            })),
        }
    }

    async fn read_system_for_start(&self) -> ManageResult<SystemConfig> {
        self.fs
            .read_system()
            .await?
            .ok_or_else(|| ManageError::UpgradeFailed {
                cause: "system does not exist".to_string(),
            })
    }

    fn verify(&self, system: &SystemConfig, options: &StartOptions) -> ManageResult<()> {
        let expected_version = &options.expected_version;
        let expected_hosts: BTreeSet<String> = options
            .expected_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect();
        if expected_hosts.is_empty() {
            return Err(ManageError::UpgradeFailed {
                cause: "expected_hosts must name at least one host".to_string(),
            });
        }
        let system_hosts: BTreeSet<String> = system.hosts.keys().cloned().collect();

        let missing_in_system: Vec<&String> = expected_hosts.difference(&system_hosts).collect();
        if !missing_in_system.is_empty() {
            return Err(ManageError::UpgradeFailed {
                cause: format!(
                    "hosts {} from expected_hosts missing in system.json",
                    join_names(&missing_in_system)
                ),
            });
        }
        let missing_in_expected: Vec<&String> = system_hosts.difference(&expected_hosts).collect();
        if !missing_in_expected.is_empty() {
            return Err(ManageError::UpgradeFailed {
                cause: format!(
                    "hosts {} in system.json are missing from expected_hosts",
                    join_names(&missing_in_expected)
                ),
            });
        }

        if expected_version != &self.config.package_version {
            return Err(ManageError::UpgradeFailed {
                cause: format!(
                    "the running host's package version {} does not match the user's expected version {expected_version}",
                    self.config.package_version
                ),
            });
        }

        let expected = PackageVersion::parse(expected_version)?;
        let mut oldest: Option<PackageVersion> = None;
        for (host, record) in &system.hosts {
            let host_version = PackageVersion::parse(&record.current_version)?;
            if version::compare(&host_version, &expected) != Ordering::Equal {
                return Err(ManageError::UpgradeFailed {
                    cause: format!(
                        "cannot start the config directory upgrade until all nodes have the expected version {expected_version}; host {host} reports {}",
                        record.current_version
                    ),
                });
            }
            oldest = Some(match oldest {
                Some(current) if current <= host_version => current,
                _ => host_version,
            });
        }
        let running = PackageVersion::parse(&self.config.package_version)?;
        if let Some(oldest) = oldest {
            if version::compare(&running, &oldest) == Ordering::Less {
                return Err(ManageError::UpgradeFailed {
                    cause: format!(
                        "cannot start the config directory upgrade until all nodes have the expected version {expected_version}; the running host's package {} is older than {}",
                        self.config.package_version,
                        oldest.raw()
                    ),
                });
            }
        }
        Ok(())
    }

    /// LOCKED is the mutual-exclusion barrier. A locked directory is only
    /// re-entered by the host that locked it (crash resume); anyone else
    /// refuses.
    async fn acquire_latch(
        &self,
        system: &mut SystemConfig,
        current_raw: &str,
    ) -> ManageResult<InProgressUpgrade> {
        if let Some(dir) = &system.config_directory {
            if dir.phase == Phase::Locked {
                match &dir.in_progress_upgrade {
                    Some(existing) if existing.running_host == self.config.hostname => {
                        tracing::info!(
                            completed = existing.completed_scripts.len(),
                            "resuming interrupted config directory upgrade"
                        );
                        return Ok(existing.clone());
                    }
                    Some(existing) => {
                        return Err(ManageError::UpgradeFailed {
                            cause: format!(
                                "config directory is locked by an upgrade running on host {}",
                                existing.running_host
                            ),
                        });
                    }
                    None => {
                        return Err(ManageError::UpgradeFailed {
                            cause: "config directory is locked".to_string(),
                        });
                    }
                }
            }
        }

        let in_progress = InProgressUpgrade {
            start_timestamp: Utc::now().timestamp_millis(),
            running_host: self.config.hostname.clone(),
            package_from_version: self.package_from_version(system),
            package_to_version: self.config.package_version.clone(),
            config_dir_from_version: current_raw.to_string(),
            config_dir_to_version: CONFIG_DIR_VERSION.to_string(),
            completed_scripts: Vec::new(),
            error: None,
        };
        let history = system
            .config_directory
            .take()
            .map(|dir| dir.upgrade_history)
            .unwrap_or_default();
        system.config_directory = Some(ConfigDirectory {
            config_dir_version: current_raw.to_string(),
            phase: Phase::Locked,
            in_progress_upgrade: Some(in_progress.clone()),
            upgrade_history: history,
        });
        self.fs.write_system(system).await?;
        Ok(in_progress)
    }

    async fn run_locked(
        &self,
        mut system: SystemConfig,
        mut in_progress: InProgressUpgrade,
        from: &PackageVersion,
        to: &PackageVersion,
        options: &StartOptions,
    ) -> ManageResult<serde_json::Value> {
        let scripts_dir = options
            .custom_scripts_dir
            .clone()
            .or_else(|| self.config.custom_upgrade_scripts_dir.clone());
        let discovered = match scripts_dir {
            Some(dir) => scripts::discover(&dir, from, to).await?,
            None => Vec::new(),
        };

        for script in discovered {
            let id = script.id();
            if in_progress.completed_scripts.iter().any(|done| done == &id) {
                tracing::info!(script = %id, "already completed in a previous attempt, skipping");
                continue;
            }
            match scripts::run(&script, self.fs.root()).await {
                Ok(()) => {
                    in_progress.completed_scripts.push(id);
                    self.persist_in_progress(&mut system, &in_progress).await?;
                }
                Err(detail) => {
                    in_progress.error = Some(detail.clone());
                    self.persist_in_progress(&mut system, &in_progress).await?;
                    return Err(ManageError::UpgradeFailed { cause: detail });
                }
            }
        }

        let record = SuccessfulUpgrade {
            timestamp: in_progress.start_timestamp,
            running_host: Some(in_progress.running_host.clone()),
            from_version: in_progress.package_from_version.clone(),
            to_version: in_progress.package_to_version.clone(),
            config_dir_from_version: Some(in_progress.config_dir_from_version.clone()),
            config_dir_to_version: Some(in_progress.config_dir_to_version.clone()),
            completed_scripts: in_progress.completed_scripts.clone(),
        };
        let dir = system
            .config_directory
            .get_or_insert_with(|| ConfigDirectory {
                config_dir_version: FRESH_CONFIG_DIR_VERSION.to_string(),
                phase: Phase::Locked,
                in_progress_upgrade: None,
                upgrade_history: UpgradeHistory::default(),
            });
        dir.upgrade_history
            .successful_upgrades
            .insert(0, record.clone());
        dir.in_progress_upgrade = None;
        dir.phase = Phase::Unlocked;
        dir.config_dir_version = CONFIG_DIR_VERSION.to_string();
        self.fs.write_system(&system).await?;
        tracing::info!(
            from = %record.config_dir_from_version.as_deref().unwrap_or(FRESH_CONFIG_DIR_VERSION),
            to = CONFIG_DIR_VERSION,
            "config directory upgrade completed"
        );
        to_value(&record)
    }

    async fn persist_in_progress(
        &self,
        system: &mut SystemConfig,
        in_progress: &InProgressUpgrade,
    ) -> ManageResult<()> {
        if let Some(dir) = &mut system.config_directory {
            dir.in_progress_upgrade = Some(in_progress.clone());
        }
        self.fs.write_system(system).await
    }

    /// The package pair in the upgrade record is denormalised history: the
    /// `from` side comes from the running host's most recent package
    /// upgrade, falling back to its current version.
    fn package_from_version(&self, system: &SystemConfig) -> String {
        system
            .hosts
            .get(&self.config.hostname)
            .map(|record| {
                record
                    .upgrade_history
                    .as_ref()
                    .and_then(|history| history.successful_upgrades.first())
                    .map(|upgrade| upgrade.from_version.clone())
                    .unwrap_or_else(|| record.current_version.clone())
            })
            .unwrap_or_else(|| self.config.package_version.clone())
    }
}

fn current_config_dir_version(system: &SystemConfig) -> String {
    system
        .config_directory
        .as_ref()
        .map(|dir| dir.config_dir_version.clone())
        .unwrap_or_else(|| FRESH_CONFIG_DIR_VERSION.to_string())
}

fn join_names(names: &[&String]) -> String {
    names
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_value<T: serde::Serialize>(record: &T) -> ManageResult<serde_json::Value> {
    serde_json::to_value(record).map_err(|err| ManageError::Malformed(err.to_string()))
}
