use anyhow::Context;
use embedfetch::{AppState, BrowserExtractor, CacheStore, ConfigStore, Resolver};
use std::{net::SocketAddr, sync::Arc};

const DEFAULT_PORT: u16 = 3000;
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "video_cache.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let port = match std::env::var("PORT") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("PORT must be a port number, got \"{raw}\""))?,
        Err(_) => DEFAULT_PORT,
    };

    let config = ConfigStore::new(CONFIG_FILE);
    let resolver = Resolver::new(
        Box::new(BrowserExtractor::new()),
        CacheStore::new(CACHE_FILE),
    );
    let app = embedfetch::router(Arc::new(AppState { resolver, config }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to listen on {addr}"))?;
    log::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
