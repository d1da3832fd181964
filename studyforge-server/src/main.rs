use anyhow::Context;
use std::sync::Arc;
use studyforge::clock::SystemClock;
use studyforge::consent::{AudienceProvider, NoopAudience, ResendAudience};
use studyforge::provider::{GenerationProvider, OpenAiProvider, StaticProvider};
use studyforge::settings::Settings;
use studyforge::telemetry::{LogSink, MulticastSink, TelemetrySink};
use studyforge_jsonl::JsonlSink;
use studyforge_prometheus::PrometheusSink;
use studyforge_server::{router, AppState, Backends};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = studyforge_server::config::load(config_path.as_deref()).context("loading settings")?;
    init_tracing(settings.telemetry.json_logs);

    if settings.auth.jwt_secret.is_empty() {
        anyhow::bail!("auth.jwt_secret is empty; set STUDYFORGE__AUTH__JWT_SECRET");
    }

    let backends = match &settings.database_url {
        Some(url) => {
            let pool = studyforge_postgres::connect(url, 10).await.context("connecting to Postgres")?;
            studyforge_postgres::migrate(&pool).await.context("running migrations")?;
            Backends::postgres(pool, &settings, SystemClock)
        }
        None => {
            tracing::warn!("no database_url configured; using in-memory storage");
            Backends::in_memory(&settings, SystemClock)
        }
    };

    let registry = prometheus::Registry::new();
    let sink = MulticastSink::new(LogSink, PrometheusSink::new(registry.clone())?);
    match settings.telemetry.audit_log.clone() {
        Some(path) => {
            tracing::info!(path = %path, "appending generation events to audit log");
            serve(&settings, backends, MulticastSink::new(sink, JsonlSink::new(path)), registry).await
        }
        None => serve(&settings, backends, sink, registry).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn provider(settings: &Settings) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    match &settings.provider.api_key {
        Some(key) => Ok(Arc::new(
            OpenAiProvider::new(key.clone())?
                .with_base_url(settings.provider.base_url.clone())
                .with_models(settings.provider.models.clone()),
        )),
        None => {
            tracing::warn!("no provider api_key configured; generation requests will fail and be refunded");
            Ok(Arc::new(StaticProvider::failing("no generation provider configured")))
        }
    }
}

fn audience(settings: &Settings) -> Arc<dyn AudienceProvider> {
    let audience = &settings.audience;
    match (&audience.api_key, &audience.audience_id) {
        (Some(key), Some(id)) => {
            let resend = ResendAudience::new(reqwest::Client::new(), key.clone(), id.clone());
            match &audience.base_url {
                Some(url) => Arc::new(resend.with_base_url(url.clone())),
                None => Arc::new(resend),
            }
        }
        _ => {
            tracing::info!("no audience configured; consent changes are not mirrored to a mailing list");
            Arc::new(NoopAudience::default())
        }
    }
}

async fn serve<S>(settings: &Settings, backends: Backends, sink: S, registry: prometheus::Registry) -> anyhow::Result<()>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    let state = AppState::new(settings, backends, provider(settings)?, audience(settings), sink, SystemClock)?
        .with_metrics(registry);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("binding {}", settings.bind))?;
    tracing::info!(addr = %settings.bind, "studyforge listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received, draining connections");
}
