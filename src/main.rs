// CommHub - Session engine for TCP and serial endpoints
use clap::Parser;
use commhub::cli::{execute_command, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}
