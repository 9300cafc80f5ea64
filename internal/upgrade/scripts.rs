use super::version::PackageVersion;
use crate::errors::ManageResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One discovered upgrade step: an executable under
/// `<scripts_dir>/<version>/`. Steps are identified by
/// `<version>/<file name>` in the upgrade record.
#[derive(Debug, Clone)]
pub struct UpgradeScript {
    pub version: String,
    pub name: String,
    pub path: PathBuf,
}

impl UpgradeScript {
    pub fn id(&self) -> String {
        format!("{}/{}", self.version, self.name)
    }
}

/// Every version directory V with `from < V <= to` contributes its files,
/// ordered by version ascending and by file name within a version.
/// Directory names that do not parse as versions are ignored.
pub async fn discover(
    scripts_dir: &Path,
    from: &PackageVersion,
    to: &PackageVersion,
) -> ManageResult<Vec<UpgradeScript>> {
    let mut entries = match tokio::fs::read_dir(scripts_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut versions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let version = match PackageVersion::parse(&name) {
            Ok(version) => version,
            Err(_) => {
                tracing::warn!(directory = %name, "skipping non-version directory in scripts dir");
                continue;
            }
        };
        if &version > from && &version <= to {
            versions.push((version, name, entry.path()));
        }
    }
    versions.sort_by(|(left, _, _), (right, _, _)| left.cmp(right));

    let mut scripts = Vec::new();
    for (_, version_name, dir) in versions {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        files.sort();
        for file in files {
            scripts.push(UpgradeScript {
                version: version_name.clone(),
                name: file.clone(),
                path: dir.join(file),
            });
        }
    }
    Ok(scripts)
}

/// Run one step with the config root as its single argument. The failure
/// string ends up in `in_progress_upgrade.error` for the operator.
pub async fn run(script: &UpgradeScript, config_root: &Path) -> Result<(), String> {
    let output = tokio::process::Command::new(&script.path)
        .arg(config_root)
        .output()
        .await
        .map_err(|err| format!("{}: failed to spawn: {err}", script.id()))?;
    if output.status.success() {
        tracing::info!(script = %script.id(), "upgrade script completed");
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "{}: {}: {}",
        script.id(),
        output.status,
        stderr.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::{discover, run, UpgradeScript};
    use crate::upgrade::version::PackageVersion;
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nsfs-scripts-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        dir
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, version: &str, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let version_dir = dir.join(version);
        std::fs::create_dir_all(&version_dir).expect("version dir");
        let path = version_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    fn version(raw: &str) -> PackageVersion {
        PackageVersion::parse(raw).expect("parse")
    }

    #[tokio::test]
    async fn discover_of_missing_dir_is_empty() {
        let missing = std::env::temp_dir().join(format!("nsfs-none-{}", Uuid::new_v4()));
        let scripts = discover(&missing, &version("0.0.0"), &version("1.0.0"))
            .await
            .expect("discover");
        assert!(scripts.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn discover_selects_half_open_version_range() {
        let dir = temp_dir();
        write_script(&dir, "0.9.0", "older", "true");
        write_script(&dir, "0.9.5", "in_range", "true");
        write_script(&dir, "1.0.0", "target", "true");
        write_script(&dir, "1.1.0", "beyond", "true");
        std::fs::create_dir_all(dir.join("notes")).expect("junk dir");

        let scripts = discover(&dir, &version("0.9.0"), &version("1.0.0"))
            .await
            .expect("discover");
        let ids: Vec<String> = scripts.iter().map(UpgradeScript::id).collect();
        assert_eq!(ids, vec!["0.9.5/in_range", "1.0.0/target"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn discover_orders_by_version_then_name() {
        let dir = temp_dir();
        write_script(&dir, "0.10.0", "b_second", "true");
        write_script(&dir, "0.10.0", "a_first", "true");
        write_script(&dir, "0.2.0", "z_early_version", "true");

        let scripts = discover(&dir, &version("0.0.0"), &version("1.0.0"))
            .await
            .expect("discover");
        let ids: Vec<String> = scripts.iter().map(UpgradeScript::id).collect();
        assert_eq!(
            ids,
            vec![
                "0.2.0/z_early_version",
                "0.10.0/a_first",
                "0.10.0/b_second"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_executes_with_config_root_argument() {
        let dir = temp_dir();
        let config_root = temp_dir();
        write_script(&dir, "1.0.0", "touch_marker", "echo done > \"$1/marker\"");
        let scripts = discover(&dir, &version("0.0.0"), &version("1.0.0"))
            .await
            .expect("discover");
        run(&scripts[0], &config_root).await.expect("run");
        let marker = std::fs::read_to_string(config_root.join("marker")).expect("marker");
        assert_eq!(marker.trim(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_reports_failure_with_stderr() {
        let dir = temp_dir();
        let config_root = temp_dir();
        write_script(&dir, "1.0.0", "explode", "echo boom 1>&2\nexit 3");
        let scripts = discover(&dir, &version("0.0.0"), &version("1.0.0"))
            .await
            .expect("discover");
        let err = run(&scripts[0], &config_root).await.unwrap_err();
        assert!(err.contains("1.0.0/explode"));
        assert!(err.contains("boom"));
    }

    #[tokio::test]
    async fn run_reports_spawn_failure() {
        let script = UpgradeScript {
            version: "1.0.0".to_string(),
            name: "ghost".to_string(),
            path: PathBuf::from("/nonexistent/ghost"),
        };
        let err = run(&script, Path::new("/tmp")).await.unwrap_err();
        assert!(err.contains("failed to spawn"));
    }
}
