use std::env;
use std::path::PathBuf;

/// Schema version of the config directory this build writes and expects.
pub const CONFIG_DIR_VERSION: &str = "1.0.0";

const DEFAULT_CONF_DIR: &str = "/etc/nsfs.conf.d";
const DEFAULT_GLACIER_LOGS_DIR: &str = "/var/log/nsfs/wal";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigRootBackend {
    #[default]
    None,
    Gpfs,
}

impl ConfigRootBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" | "none" => Some(Self::None),
            "GPFS" => Some(Self::Gpfs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gpfs => "GPFS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_root: PathBuf,
    pub config_root_backend: ConfigRootBackend,
    pub glacier_logs_dir: PathBuf,
    pub custom_upgrade_scripts_dir: Option<PathBuf>,
    pub package_version: String,
    pub hostname: String,
}

impl Config {
    pub fn load(package_version: &str) -> Result<Self, String> {
        let config_root = PathBuf::from(env_or_default(
            "NSFS_NC_DEFAULT_CONF_DIR",
            DEFAULT_CONF_DIR,
        ));
        let glacier_logs_dir = PathBuf::from(env_or_default(
            "NSFS_GLACIER_LOGS_DIR",
            DEFAULT_GLACIER_LOGS_DIR,
        ));
        let config_root_backend = match env::var("NSFS_NC_CONFIG_ROOT_BACKEND") {
            Ok(raw) => ConfigRootBackend::parse(&raw)
                .ok_or("NSFS_NC_CONFIG_ROOT_BACKEND must be none or GPFS")?,
            Err(_) => ConfigRootBackend::None,
        };
        Ok(Self {
            config_root,
            config_root_backend,
            glacier_logs_dir,
            custom_upgrade_scripts_dir: env::var("NSFS_NC_UPGRADE_SCRIPTS_DIR")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from),
            package_version: package_version.to_string(),
            hostname: local_hostname(),
        })
    }
}

pub fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

/// Deterministic key generation is test-only and opt-in.
pub fn random_seed_disabled() -> bool {
    env::var("DISABLE_INIT_RANDOM_SEED")
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

pub fn local_hostname() -> String {
    if let Ok(name) = env::var("NSFS_NC_HOSTNAME") {
        if !name.trim().is_empty() {
            return name;
        }
    }
    gethostname().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn gethostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).ok()
}

#[cfg(not(unix))]
fn gethostname() -> Option<String> {
    None
}
