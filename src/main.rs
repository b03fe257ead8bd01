use std::process;

use anyhow::{Context, Result};
use authgate::config::ConfigArgs;
use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct GateArgs {
    /// Print the loaded configuration (JSON) and exit.
    #[arg(long)]
    pub print_config: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

async fn run(args: GateArgs) -> Result<()> {
    let cfg = args.config.load()?;

    if args.print_config {
        let data = serde_json::to_string_pretty(&cfg).context("encode config")?;
        println!("{data}");
        return Ok(());
    }

    authgate::logs::init(&cfg.logs)?;

    let gate = cfg.build_gate()?;
    info!("Loaded {} rules", gate.rules().len());

    let srv = cfg.build_server(gate)?;
    srv.run().await.context("run gate server")?;

    info!("Gate exited by user");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = GateArgs::parse();
    match run(args).await {
        Ok(()) => {}
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
