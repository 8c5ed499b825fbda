mod app;
mod cli;
mod server;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    telemetry::init_telemetry(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %args.host,
        port = args.port,
        "Starting LINE agent bridge"
    );

    let app = App::build(args).await?;
    app.run()
        .await
        .inspect_err(|e| error!("Bridge stopped: {:#}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert()
    }
}
