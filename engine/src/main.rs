use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutor_engine::{
    classifier::RiskClassifier,
    config::Config,
    engine::TutorEngine,
    model_store::FileModelStore,
    recommendation::{OpenAiGenerator, RecommendationGenerator},
    records::InMemoryRecords,
    routes::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    info!(
        "Loaded configuration: port={}, model_path={}, records_path={:?}, prompt_style={:?}",
        config.port, config.model_path, config.records_path, config.prompt_style
    );
    if config.llm.api_key.is_empty() {
        warn!("No API key configured; intervention text will use the degraded message");
    }

    // Training a fresh model is CPU bound and fatal on failure
    let store = Arc::new(FileModelStore::new(&config.model_path));
    let classifier_config = config.classifier.to_classifier_config();
    let classifier =
        tokio::task::spawn_blocking(move || RiskClassifier::load_or_train(store, classifier_config)).await??;

    let records = match &config.records_path {
        Some(path) => InMemoryRecords::from_json_file(path)?,
        None => {
            warn!("No records_path configured, starting with empty learner records");
            InMemoryRecords::default()
        }
    };

    let generator = OpenAiGenerator::new(config.llm.clone())?;
    let engine = TutorEngine::new(
        Arc::new(records),
        Arc::new(classifier),
        RecommendationGenerator::new(Arc::new(generator), config.prompt_style),
    );

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let app = router(AppState {
        engine: Arc::new(engine),
        prometheus: Some(prometheus),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting tutor engine on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
