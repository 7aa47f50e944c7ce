// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use kiosk::config::Config;

#[derive(Parser)]
#[command(name = "kiosk", version, about = "Controller for the automated container-return kiosk.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Print the resolved configuration (secrets masked) and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.check_config {
        print!("{}", cli.config.sanitized_dump());
        std::process::exit(0);
    }

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = kiosk::run::run(cli.config).await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}
