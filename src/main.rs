use std::sync::Arc;

use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flag_evaluation_service::{
    config::{Config, FlagSource, LogFormat},
    recording::{LogRecordingSink, PgRecordingSink, Recorder, RecordingSink},
    routes,
    service::FlagService,
    state::AppState,
    store::{FlagStore, InMemoryFlagStore, PgFlagStore},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let (store, sink): (Arc<dyn FlagStore>, Arc<dyn RecordingSink>) = match &config.flag_source {
        FlagSource::Postgres { url } => {
            let db = PgPool::connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            tracing::info!("connected to database, migrations applied");
            (
                Arc::new(PgFlagStore::new(db.clone())),
                Arc::new(PgRecordingSink::new(db)),
            )
        }
        FlagSource::File { path } => {
            let store = InMemoryFlagStore::from_path(path).await?;
            (Arc::new(store), Arc::new(LogRecordingSink))
        }
    };

    let (recorder, _recorder_task) = Recorder::spawn(sink, config.recording_buffer);
    let state = AppState::new(FlagService::new(store, recorder));

    let app = routes::routes(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!("server is listening at http://{}", config.addr());

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}
