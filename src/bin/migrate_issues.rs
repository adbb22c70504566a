use anyhow::Result;

use redmine_migrate::config;
use redmine_migrate::idmap::{self, IdMap};
use redmine_migrate::migrate::{IssueMigrator, MigrationSettings};
use redmine_migrate::providers::azure::AzureDevOpsClient;
use redmine_migrate::providers::redmine::RedmineClient;
use redmine_migrate::{cli, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let run_args = cli::parse_run_args(&args)?;
    if run_args.help {
        cli::print_run_help("migrate-issues", "copy Redmine issues into Azure DevOps work items");
        return Ok(());
    }

    let config = config::load_config(run_args.config.as_deref())?;
    let redmine = RedmineClient::new(&config.redmine_settings()?);
    let azure_settings = config.azure_settings()?;
    let azure = AzureDevOpsClient::new(&azure_settings);
    let filter = config.issue_filter()?;

    // Seeding from an earlier map keeps already migrated issues from being created twice.
    let id_map = match &config.output.resume_from {
        Some(path) => {
            let map = IdMap::load(path)?;
            tracing::info!(path = %path.display(), entries = map.len(), "resuming from id map");
            map
        }
        None => IdMap::new(),
    };
    let id_map_path = idmap::timestamped_path(&config.id_map_dir());

    let migrator = IssueMigrator::new(
        &redmine,
        &azure,
        MigrationSettings::new(&azure_settings, &config.mapping),
    );
    let (report, _) = migrator.run(&filter, id_map, &id_map_path).await?;

    println!(
        "Created {} work items ({} already migrated), {} parent links, {} items with fixed references.",
        report.created.len(),
        report.skipped.len(),
        report.parent_links,
        report.items_fixed
    );
    println!("Id map: {}", report.id_map_path.display());
    Ok(())
}
