use std::path::Path;

use clap::Parser;
use tracing::{error, info};

use council_consensus::select_protocol;
use council_node::{
    cli::{Cli, Commands},
    logging::{default_audit_path, init_logging},
    simulation::{build_engine, run_round},
    CouncilFile,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, protocol, audit_log, no_audit, snapshot } => {
            let audit_path = match (no_audit, audit_log) {
                (true, _) => None,
                (false, Some(path)) => Some(path),
                (false, None) => Some(default_audit_path()),
            };
            if let Some(dir) = audit_path.as_deref().and_then(Path::parent) {
                std::fs::create_dir_all(dir)?;
            }
            let _guard = init_logging(audit_path.as_deref());

            info!("loading council file {}", config.display());
            let mut file = CouncilFile::load_from_file(&config)?;
            if protocol.is_some() {
                file.protocol = protocol;
            }

            let engine = build_engine(&file);
            let outcome = run_round(&engine, &file).await;
            if let Some(path) = &snapshot {
                engine.snapshot().await.save_to_file(path)?;
                info!("snapshot written to {}", path.display());
            }
            engine.shutdown().await;

            match outcome {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => {
                    error!("council round failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Select { element } => {
            println!("{}", select_protocol(element.as_deref()));
        }
        Commands::InitConfig { out, protocol, force } => {
            if out.exists() && !force {
                return Err(format!("{} already exists (use --force to overwrite)", out.display()).into());
            }
            let file = CouncilFile { protocol, ..CouncilFile::sample() };
            file.save_to_file(&out)?;
            println!("wrote {}", out.display());
        }
    }

    Ok(())
}
