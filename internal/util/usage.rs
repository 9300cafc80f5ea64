const USAGE: &str = "\
nsfsctl — filesystem-backed object storage control plane

USAGE:
    nsfsctl <type> <action> [--flag value]...

TYPES AND ACTIONS:
    account   add | update | list | status | delete
    bucket    add | update | list | status | delete
    upgrade   start | status | history

COMMON FLAGS:
    --config_root <dir>              Config directory root
    --config_root_backend <kind>     none | GPFS                [none]
    --from_file <path>               Read add options from a JSON file

ACCOUNT FLAGS:
    --name <name>                    Account name
    --new_buckets_path <dir>         Directory new buckets are created in
    --uid <uid>                      Filesystem uid (with --gid)
    --gid <gid>                      Filesystem gid (with --uid)
    --user <name>                    Distinguished user name (instead of uid/gid)
    --access_key <key>               20-character access key
    --secret_key <key>               40-character secret key
    --regenerate                     Rotate to a generated key pair (update)
    --wide                           List full records instead of names

BUCKET FLAGS:
    --name <name>                    Bucket name
    --owner_account <name>           Owning account
    --path <dir>                     Bucket content directory

UPGRADE FLAGS:
    --expected_version <semver>      Package version deployed on every host
    --expected_hosts <h1,h2,...>     Every hostname in the deployment
    --skip_verification              Skip host and version gating
    --custom_upgrade_scripts_dir <dir>  Override the upgrade scripts location

ENVIRONMENT:
    NSFS_NC_DEFAULT_CONF_DIR         Default config root
    NSFS_GLACIER_LOGS_DIR            Glacier WAL directory
    DISABLE_INIT_RANDOM_SEED         Deterministic key generation (test only)

EXIT CODES:
    0  success      1  usage error      2  internal error

Output is a single JSON object on stdout.
";

pub fn print_usage() {
    print!("{USAGE}");
}

pub fn print_version(version: &str) {
    println!("nsfsctl {version}");
}

fn handle_cli_flags_from_args(args: &[String], version: &str) -> bool {
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return true;
            }
            "-v" | "--version" => {
                print_version(version);
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Check CLI args for --help/-h or --version/-v.
/// Returns `true` if a flag was handled (caller should exit).
pub fn handle_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, version)
}
