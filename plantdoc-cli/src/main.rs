use anyhow::Result;
use clap::Parser;
use plantdoc_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    plantdoc_telemetry::init_with_format(cli.log_format, "warn")?;

    plantdoc_cli::run(cli).await
}
