use clap::Parser;
use loyalty_service::{App, Config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    // Held until exit so buffered log output is flushed.
    let _log_guard = logging::init(&config);

    let app = App::new(config).await?;
    app.run().await
}
