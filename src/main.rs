use team_tracker_lib::{init_tracing, serve, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config)?;
    serve(config).await?;
    Ok(())
}
