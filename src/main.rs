#[macro_use]
extern crate log;

use clap::Parser;

mod admission;
mod clientset;
mod config;
mod logging;
mod router;
mod server;
mod timezone;
mod tls;

#[cfg(test)]
mod testutil;

use config::{Cli, ServerConfig};
use server::{Server, StartupError};
use timezone::TimezoneInjector;

#[tokio::main]
pub async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = ServerConfig::try_from(cli)?;
    let handler = TimezoneInjector::new(config.timezone.clone(), config.inject);

    Server::new(config, Box::new(handler)).start().await
}
