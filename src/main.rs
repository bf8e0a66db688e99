use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use supply_estimator::{
    config::AppConfig,
    server::{router, shutdown_on, AppState},
    PredictionService, ReferenceCatalog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = AppConfig::from_env()?;
    tracing::info!("config: {:?}", cfg);

    // Without the reference table there is nothing to choose from.
    let catalog = ReferenceCatalog::load(&cfg.catalog_path)
        .with_context(|| format!("could not load reference data {}", cfg.catalog_path.display()))?;
    tracing::info!(
        "catalog ready: {} towns, {} records",
        catalog.towns().len(),
        catalog.len()
    );

    let service = match PredictionService::load(&cfg.transformer_path, &cfg.predictor_path) {
        Ok(svc) => {
            tracing::info!("loaded model; in_dim={}", svc.n_features());
            Some(Arc::new(svc))
        }
        Err(e) => {
            tracing::error!("model files not loaded, predictions disabled: {e}");
            None
        }
    };

    let state = AppState::new(Arc::new(catalog), service)
        .with_session_ttl(Duration::from_secs(cfg.session_ttl_secs));

    // Abandoned sessions are also dropped lazily on access; the sweep bounds
    // the map when nobody comes back.
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweeper.session_ttl().max(Duration::from_secs(1)));
        loop {
            tick.tick().await;
            sweeper.evict_idle();
        }
    });

    let app = router(state);

    tracing::info!("listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c()))
        .await?;
    Ok(())
}
