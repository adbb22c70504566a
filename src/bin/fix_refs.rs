use anyhow::Result;

use redmine_migrate::idmap::IdMap;
use redmine_migrate::{cli, logging, refs};

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let fix = match cli::parse_fix_args(&args) {
        Ok(fix) => fix,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let map = IdMap::load(&fix.id_map)?;
    let replaced = refs::fix_file(&map, &fix.file)?;
    println!("Replaced {replaced} references in {}", fix.file.display());
    Ok(())
}
