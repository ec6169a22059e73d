//! services/bot/src/bin/bot.rs

use async_openai::{config::OpenAIConfig, Client};
use prezentor_bot::{
    adapters::{db::PgAdapter, pptx::PptxRenderer, telegram::TelegramClient, text_llm::OpenAiTextAdapter},
    bot::{
        polling,
        webhook::{self, WebhookState, WEBHOOK_PATH},
        AppState, Dispatcher,
    },
    config::{Config, Intake},
    error::BotError,
};
use prezentor_core::{ContentGenerator, DocumentAssembler, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(90);

#[tokio::main]
async fn main() -> Result<(), BotError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting bot...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(PgAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.gemini_api_key)
        .with_api_base(&config.llm_base_url);
    let text_adapter = Arc::new(OpenAiTextAdapter::new(
        Client::with_config(openai_config),
        config.llm_model.clone(),
        PROVIDER_TIMEOUT,
    ));
    let generator = Arc::new(ContentGenerator::new(
        text_adapter,
        RetryPolicy {
            max_attempts: config.retry_attempts,
            delay: config.retry_delay,
        },
    ));
    let assembler = Arc::new(DocumentAssembler::new(
        Arc::new(PptxRenderer::new()),
        config.assets_dir.clone(),
        config.output_dir.clone(),
        config.outline_attempts,
    ));

    let telegram = Arc::new(TelegramClient::new(&config.bot_token)?);
    let identity = telegram.get_me().await?;
    let bot_username = identity
        .username
        .ok_or_else(|| BotError::Internal("the bot account has no username".to_string()))?;
    info!(bot = %bot_username, id = identity.id, "Connected to Telegram");

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        db_adapter.clone(),
        db_adapter,
        telegram.clone(),
        generator,
        assembler,
        config.clone(),
        bot_username,
    ));
    let dispatcher = Dispatcher::new(app_state.clone());

    let shutdown = CancellationToken::new();
    tokio::spawn(listen_for_shutdown(shutdown.clone()));

    // --- 5. Start Receiving Updates ---
    match &config.intake {
        Intake::LongPolling => {
            polling::run(telegram, dispatcher.clone(), shutdown).await;
        }
        Intake::Webhook { url, secret } => {
            let endpoint = format!("{}{}", url.trim_end_matches('/'), WEBHOOK_PATH);
            telegram.set_webhook(&endpoint, secret).await?;
            info!(%endpoint, "Webhook registered");

            let app = webhook::router(WebhookState {
                dispatcher: dispatcher.clone(),
                secret: Arc::from(secret.as_str()),
            });
            info!("Starting webhook server on {}", config.bind_address);
            let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    // --- 6. Let In-Flight Work Finish ---
    info!("Waiting for running conversations and generation jobs...");
    dispatcher.close();
    app_state.tracker.close();
    app_state.tracker.wait().await;
    info!("Shutdown complete.");
    Ok(())
}

async fn listen_for_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
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
                warn!("Could not listen for SIGTERM: {}", e);
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
    info!("Shutdown requested.");
    token.cancel();
}
