//! Thin CLI glue (§4.12) wiring a real `FileLdifSource` + `KvEnv` +
//! `JobController` together. Argument parsing only; all behaviour lives in
//! the library crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dsimport::config::{ImportConfig, ServerIdentity};
use dsimport::contracts::{FileLdifSource, NoopSchemaChecker};
use dsimport::import::ldif::LdifSource;
use dsimport::import::JobController;
use dsimport::kvstore::KvEnv;

#[derive(Parser, Debug)]
#[command(name = "dsimport", about = "Bulk LDIF import/reindex for a directory server backend")]
struct Cli {
    /// Backend instance name (suffix directory under db-home).
    #[arg(long, default_value = "userroot")]
    instance: String,

    /// Directory holding the LMDB environment.
    #[arg(long, default_value = "./db")]
    db_home: PathBuf,

    /// LDIF files to import, in order. Use `-` for stdin.
    #[arg(required = true)]
    ldif_files: Vec<String>,

    /// Attributes to build equality indexes for.
    #[arg(long, value_delimiter = ',', default_value = "cn,uid,objectclass")]
    index: Vec<String>,

    /// Validate input and report what would happen without writing.
    #[arg(long)]
    dry_run: bool,

    /// Base suffix DN entries must fall under to be imported.
    #[arg(long)]
    suffix: Option<String>,
}

fn main() -> dsimport::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let mut config = ImportConfig {
        identity: ServerIdentity {
            instance_name: cli.instance.clone(),
            suffixes: cli.suffix.clone().into_iter().collect(),
        },
        db_home: cli.db_home.clone(),
        ldif_files: cli.ldif_files.clone(),
        indexed_attributes: cli.index,
        dry_run: cli.dry_run,
        ..ImportConfig::default()
    };
    if let Some(suffix) = &cli.suffix {
        config.include_subtrees = vec![suffix.clone()];
    }

    let instance_dir = cli.db_home.join(&cli.instance);
    let env = Arc::new(KvEnv::open(&instance_dir, 16 + config.indexed_attributes.len() as u32)?);
    let controller = JobController::new(env, config.clone());

    let mut sources = Vec::new();
    for path in &config.ldif_files {
        let source = FileLdifSource::open(path)?;
        sources.push((Box::new(source) as Box<dyn LdifSource>, path.clone()));
    }

    let result = controller.run_bulk_import(sources, Arc::new(NoopSchemaChecker))?;

    tracing::info!(
        processed = result.processed,
        skipped = result.skipped,
        aborted = result.aborted,
        "import complete"
    );
    for warning in &result.warnings {
        tracing::warn!("{warning}");
    }

    if result.aborted {
        std::process::exit(1);
    }
    Ok(())
}
