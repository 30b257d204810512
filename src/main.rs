//! Application entry point for the `cloudburst-predictor` service.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Loading the feature scaler and probing the model server (both optional)
//! - Starting the MQTT relay client and the SMS notifier (both optional)
//! - Connecting the calibration database and creating its schema (optional)
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving requests
//!
//! Every optional collaborator degrades with a warning instead of stopping
//! the process. Only a missing or invalid node catalog or InfluxDB setting is
//! fatal.
//!
//! # Environment Variables
//! See `config.rs` for the full list. Logging is controlled by
//! `APP_LOG_LEVEL` (default: `debug`), `APP_SPAN_EVENTS` and `FORCE_COLOR`.
use std::{env, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

mod alerts;
mod atmosphere;
mod calibration;
mod chart;
mod conditions;
mod config;
mod error;
mod history;
mod inference;
mod models;
mod notify;
mod pipeline;
mod reconcile;
mod relay;
mod risk;
mod routes;
mod schema;
mod sensors;
mod tensor;

// Re-exported for routes/*.rs, so handlers only know their parent module.
pub use error::PipelineError;
pub use models::{HistoryPrediction, LatestPrediction};
pub use pipeline::{HistoryRequest, Predictor};

use alerts::{DecisionController, InMemoryAlertState};
use calibration::{CalibrationSink, PgCalibrationLog};
use chart::{ChartRenderer, RemoteChartRenderer};
use conditions::RealtimeClient;
use config::Config;
use history::ArchiveClient;
use inference::{Classifier, InferenceEngine, RemoteClassifier};
use notify::{Notifier, SmsNotifier};
use relay::{MqttRelay, RelayPublisher};
use sensors::InfluxClient;
use tensor::{Scaler, TensorAssembler};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let client = Client::builder()
        .user_agent(concat!("cloudburst-predictor/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let predictor = build_predictor(&cfg, client).await;

    let app: Router = routes::router(Arc::new(predictor));

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Wire every collaborator from configuration.
async fn build_predictor(cfg: &Config, client: Client) -> Predictor {
    // ---
    let scaler = match &cfg.scaler_path {
        Some(path) => match Scaler::load(path) {
            Ok(scaler) => {
                tracing::info!("Loaded feature scaler from {}", path.display());
                Some(scaler)
            }
            Err(e) => {
                tracing::warn!("Feature scaler unavailable, inputs will be zero: {:#}", e);
                None
            }
        },
        None => {
            tracing::warn!("SCALER_PATH not set, inputs will be zero");
            None
        }
    };

    let model: Option<Box<dyn Classifier>> = match &cfg.model_url {
        Some(url) => match RemoteClassifier::connect(client.clone(), url).await {
            Ok(model) => {
                tracing::info!("Model server ready at {}", url);
                Some(Box::new(model) as Box<dyn Classifier>)
            }
            Err(e) => {
                tracing::warn!("Model server unavailable, using fallback probabilities: {:#}", e);
                None
            }
        },
        None => {
            tracing::warn!("MODEL_URL not set, using fallback probabilities");
            None
        }
    };

    let relay: Option<Arc<dyn RelayPublisher>> = cfg.mqtt.as_ref().map(|settings| {
        let (relay, _event_loop) = MqttRelay::start(settings);
        tracing::info!("MQTT relay publishing to {}", settings.topic);
        Arc::new(relay) as Arc<dyn RelayPublisher>
    });

    let notifier: Option<Arc<dyn Notifier>> = match &cfg.sms_api_key {
        Some(key) if !cfg.sms_recipients.is_empty() => {
            let sms = SmsNotifier::new(
                client.clone(),
                cfg.sms_url.clone(),
                key.clone(),
                cfg.sms_recipients.clone(),
            );
            Some(Arc::new(sms) as Arc<dyn Notifier>)
        }
        _ => {
            tracing::warn!("SMS notifier disabled (no API key or recipients)");
            None
        }
    };

    let calibration = match &cfg.db_url {
        Some(url) => connect_calibration(url, cfg.db_pool_max).await,
        None => {
            tracing::info!("DATABASE_URL not set, calibration logging disabled");
            None
        }
    };

    let chart = cfg.chart_url.as_ref().map(|url| {
        let renderer = RemoteChartRenderer::new(client.clone(), url.clone());
        Arc::new(renderer) as Arc<dyn ChartRenderer>
    });

    let controller = DecisionController::new(
        cfg.risk_threshold,
        cfg.relay_policy,
        relay,
        notifier,
        Arc::new(InMemoryAlertState::default()),
    );

    let assembler = TensorAssembler::new(scaler);
    let engine = InferenceEngine::new(model);
    tracing::info!(
        "Serving {} nodes (scaler={}, model={}, threshold={})",
        cfg.nodes.len(),
        assembler.has_scaler(),
        engine.has_model(),
        controller.threshold()
    );

    Predictor {
        nodes: cfg.nodes.clone(),
        sensors: Arc::new(InfluxClient::new(
            client.clone(),
            &cfg.influx_url,
            cfg.influx_token.clone(),
            cfg.influx_org.clone(),
        )),
        conditions: Arc::new(RealtimeClient::new(
            client.clone(),
            cfg.conditions_url.clone(),
            cfg.conditions_api_key.clone(),
        )),
        history: Arc::new(ArchiveClient::new(client, cfg.archive_url.clone())),
        assembler,
        engine,
        controller: Arc::new(controller),
        calibration,
        chart,
    }
}

/// Connect the calibration database and ensure its schema. Any failure
/// disables calibration logging.
async fn connect_calibration(url: &str, max_connections: u32) -> Option<Arc<dyn CalibrationSink>> {
    // ---
    tracing::info!(
        "Attempting to connect to calibration database: {}",
        config::mask_url_password(url)
    );

    let pool = match PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!("Calibration database unavailable, logging disabled: {}", e);
            return None;
        }
    };

    if let Err(e) = schema::create_schema(&pool).await {
        tracing::warn!("Calibration schema setup failed, logging disabled: {:#}", e);
        return None;
    }

    tracing::info!("Calibration logging enabled");
    Some(Arc::new(PgCalibrationLog::new(pool)) as Arc<dyn CalibrationSink>)
}

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces it on, `0|false|no` forces
///   it off, anything else auto-detects a TTY
/// - Span events via `APP_SPAN_EVENTS`: `"full"`, `"enter_exit"`, or CLOSE
///   only (default)
/// - Level via `RUST_LOG` when set, otherwise `APP_LOG_LEVEL`
///
/// Call once at startup, before any tracing macro runs.
fn init_tracing() {
    // ---
    let span_events = match env::var("APP_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("APP_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info,hyper=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
