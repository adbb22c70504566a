use anyhow::Result;

use redmine_migrate::config;
use redmine_migrate::providers::redmine::RedmineClient;
use redmine_migrate::wiki::WikiExporter;
use redmine_migrate::{cli, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let run_args = cli::parse_run_args(&args)?;
    if run_args.help {
        cli::print_run_help("export-wiki", "write a Redmine wiki as an Azure DevOps wiki tree");
        return Ok(());
    }

    let config = config::load_config(run_args.config.as_deref())?;
    let redmine = RedmineClient::new(&config.redmine_settings()?);
    let project = config.wiki_project()?;
    let output_dir = config.wiki_output_dir();

    let report = WikiExporter::new(&redmine, project, &output_dir)
        .export()
        .await?;

    println!(
        "Wrote {} pages to {}.",
        report.written.len(),
        output_dir.display()
    );
    if !report.with_ignored_content.is_empty() {
        println!(
            "Comments/attachments not exported for: {}",
            report.with_ignored_content.join(", ")
        );
    }
    if !report.missing.is_empty() {
        println!("Listed but not found: {}", report.missing.join(", "));
    }
    Ok(())
}
