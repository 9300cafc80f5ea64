use nsfs_core::errors::{ManageError, ManageResult};
use nsfs_core::manage::{error_value, ManageApi};
use nsfs_core::util::config::{Config, ConfigRootBackend};
use nsfs_core::util::usage;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("NSFS_APP_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

const EXIT_USAGE: u8 = 1;
const EXIT_INTERNAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    if usage::handle_cli_flags(APP_VERSION) {
        return ExitCode::SUCCESS;
    }
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{message}");
            usage::print_usage();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(invocation).await {
        Ok(reply) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", error_value(&err));
            if err.is_usage() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::from(EXIT_INTERNAL)
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

struct Invocation {
    kind: String,
    action: String,
    options: Map<String, Value>,
}

fn parse_invocation(args: &[String]) -> Result<Invocation, String> {
    let kind = args
        .first()
        .ok_or("missing <type>: expected account, bucket or upgrade")?;
    let action = args.get(1).ok_or("missing <action>")?;
    let options = parse_flags(&args[2..])?;
    Ok(Invocation {
        kind: kind.clone(),
        action: action.clone(),
        options,
    })
}

/// `--flag value` pairs; a flag without a value is boolean true.
fn parse_flags(args: &[String]) -> Result<Map<String, Value>, String> {
    let mut options = Map::new();
    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        let name = arg
            .strip_prefix("--")
            .ok_or_else(|| format!("unexpected argument: {arg}"))?;
        if name.is_empty() {
            return Err("empty flag name".to_string());
        }
        let value = match args.get(index + 1) {
            Some(next) if !next.starts_with("--") => {
                index += 1;
                Value::String(next.clone())
            }
            _ => Value::Bool(true),
        };
        if options.insert(name.to_string(), value).is_some() {
            return Err(format!("flag --{name} was given twice"));
        }
        index += 1;
    }
    Ok(options)
}

async fn run(mut invocation: Invocation) -> ManageResult<Value> {
    let mut config = Config::load(APP_VERSION).map_err(ManageError::InvalidArgument)?;
    apply_global_flags(&mut config, &mut invocation.options)?;
    let api = ManageApi::new(config);
    let (code, reply) = api
        .run(
            &invocation.kind,
            &invocation.action,
            Value::Object(invocation.options),
        )
        .await?;
    Ok(serde_json::json!({ "response": { "code": code, "reply": reply } }))
}

fn apply_global_flags(config: &mut Config, options: &mut Map<String, Value>) -> ManageResult<()> {
    if let Some(value) = options.remove("config_root") {
        config.config_root = PathBuf::from(expect_string("config_root", value)?);
    }
    if let Some(value) = options.remove("config_root_backend") {
        let raw = expect_string("config_root_backend", value)?;
        config.config_root_backend = ConfigRootBackend::parse(&raw).ok_or_else(|| {
            ManageError::InvalidArgument(format!(
                "config_root_backend must be none or GPFS, got {raw}"
            ))
        })?;
    }
    Ok(())
}

fn expect_string(name: &str, value: Value) -> ManageResult<String> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(ManageError::InvalidArgumentType(format!(
            "option {name} must be a string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_flags, parse_invocation};
    use serde_json::Value;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_invocation_splits_type_action_flags() {
        let invocation =
            parse_invocation(&args(&["account", "add", "--name", "a1"])).expect("parse");
        assert_eq!(invocation.kind, "account");
        assert_eq!(invocation.action, "add");
        assert_eq!(invocation.options["name"], "a1");
    }

    #[test]
    fn parse_invocation_requires_type_and_action() {
        assert!(parse_invocation(&args(&[])).is_err());
        assert!(parse_invocation(&args(&["account"])).is_err());
    }

    #[test]
    fn parse_flags_handles_values_and_booleans() {
        let flags = parse_flags(&args(&[
            "--name",
            "a1",
            "--wide",
            "--uid",
            "1001",
            "--regenerate",
        ]))
        .expect("parse");
        assert_eq!(flags["name"], "a1");
        assert_eq!(flags["wide"], Value::Bool(true));
        assert_eq!(flags["uid"], "1001");
        assert_eq!(flags["regenerate"], Value::Bool(true));
    }

    #[test]
    fn parse_flags_rejects_bare_values_and_duplicates() {
        assert!(parse_flags(&args(&["name"])).is_err());
        assert!(parse_flags(&args(&["--name", "a", "--name", "b"])).is_err());
        assert!(parse_flags(&args(&["--"])).is_err());
    }
}
