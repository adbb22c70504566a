use std::path::PathBuf;

use crate::error::MigrateError;

pub const FIX_USAGE: &str = "Usage: fix-refs <issue_map.json> <file.md>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixArgs {
    pub id_map: PathBuf,
    pub file: PathBuf,
}

/// Exactly two positionals: the id map and the file to rewrite.
pub fn parse_fix_args(args: &[String]) -> Result<FixArgs, MigrateError> {
    match args {
        [id_map, file] => Ok(FixArgs {
            id_map: PathBuf::from(id_map),
            file: PathBuf::from(file),
        }),
        _ => Err(MigrateError::Usage(format!(
            "Need 2 arguments, got {}\n{FIX_USAGE}",
            args.len()
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub help: bool,
}

/// Arguments of the two migrators: an optional `--config <path>` and `--help`.
///
/// Supported forms:
///   migrate-issues
///   migrate-issues --config migrate.toml
///   migrate-issues -c migrate.toml
pub fn parse_run_args(args: &[String]) -> Result<RunArgs, MigrateError> {
    let mut parsed = RunArgs::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => parsed.config = Some(PathBuf::from(path)),
                    None => {
                        return Err(MigrateError::Usage(
                            "Missing value for -c/--config flag".into(),
                        ))
                    }
                }
            }
            "-h" | "--help" => parsed.help = true,
            other => {
                return Err(MigrateError::Usage(format!("Unexpected argument: {other}")));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

pub fn print_run_help(binary: &str, what: &str) {
    println!("{binary}: {what}\n");
    println!("USAGE:");
    println!("  {binary} [--config <path>]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <path>  Migration config (default: $REDMINE_MIGRATE_CONFIG,");
    println!("                       ./migrate.toml, ~/.redmine-migrate/config.toml)");
    println!("  -h, --help           Show this help");
    println!();
    println!("ENVIRONMENT:");
    println!("  REDMINE_URL, REDMINE_API_KEY, AZURE_DEVOPS_ORG, AZURE_DEVOPS_PROJECT,");
    println!("  AZURE_DEVOPS_TOKEN override the config file; RUST_LOG sets verbosity.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fix_takes_two_paths() {
        let parsed = parse_fix_args(&args(&["map.json", "README.md"])).unwrap();
        assert_eq!(parsed.id_map, PathBuf::from("map.json"));
        assert_eq!(parsed.file, PathBuf::from("README.md"));
    }

    #[test]
    fn fix_rejects_wrong_count() {
        for bad in [vec![], vec!["map.json"], vec!["a", "b", "c"]] {
            let err = parse_fix_args(&args(&bad)).unwrap_err();
            assert!(matches!(err, MigrateError::Usage(_)));
            assert!(err.to_string().contains(FIX_USAGE));
        }
    }

    #[test]
    fn run_without_args() {
        assert_eq!(parse_run_args(&[]).unwrap(), RunArgs::default());
    }

    #[test]
    fn run_with_config_short_and_long() {
        let long = parse_run_args(&args(&["--config", "m.toml"])).unwrap();
        assert_eq!(long.config, Some(PathBuf::from("m.toml")));
        let short = parse_run_args(&args(&["-c", "other.toml"])).unwrap();
        assert_eq!(short.config, Some(PathBuf::from("other.toml")));
    }

    #[test]
    fn run_missing_config_value_fails() {
        let err = parse_run_args(&args(&["--config"])).unwrap_err();
        assert!(err.to_string().contains("Missing value"));
    }

    #[test]
    fn run_rejects_positionals() {
        let err = parse_run_args(&args(&["extra"])).unwrap_err();
        assert!(err.to_string().contains("Unexpected argument: extra"));
    }

    #[test]
    fn run_help_flag() {
        assert!(parse_run_args(&args(&["-h"])).unwrap().help);
    }
}
