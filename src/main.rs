use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use jv_report::channels::webhook::{WEBHOOK_PATH, webhook_routes};
use jv_report::channels::{Mailer, Messenger, SmtpMailer, TelegramChannel};
use jv_report::config::{BotConfig, UpdateMode};
use jv_report::session::Session;
use jv_report::{CompletionPipeline, IntakeGate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = BotConfig::from_env().context("loading configuration")?;
    let _log_guard = init_tracing(&config.dirs.bot_log)?;

    config
        .dirs
        .ensure()
        .context("creating working directories")?;

    eprintln!("🤖 JV Report Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {:?}", config.telegram.mode);
    eprintln!("   Photos: {}", config.dirs.downloads.display());
    eprintln!("   PDFs: {}", config.dirs.pdfs.display());
    eprintln!(
        "   SMTP: {}:{} ({} recipients)",
        config.mail.smtp_host,
        config.mail.smtp_port,
        config.mail.recipients.len()
    );

    let telegram = TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.api_base.clone(),
    );
    if let Err(e) = telegram.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed, continuing anyway");
    }

    let messenger: Arc<dyn Messenger> = Arc::new(telegram.clone());
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(config.mail.clone()));

    let pipeline = CompletionPipeline::new(
        Arc::clone(&messenger),
        mailer,
        config.dirs.clone(),
        config.mail.signature.clone(),
    );
    let gate = IntakeGate::new(
        config.telegram.authorized_chat_id,
        config.dirs.downloads.clone(),
        Arc::new(Session::new()),
        messenger,
        pipeline,
    );

    let updates = match config.telegram.mode {
        UpdateMode::Polling => telegram.start_polling(),
        UpdateMode::Webhook => {
            if config.telegram.webhook_secret.is_none() {
                tracing::warn!("WEBHOOK_SECRET not set; webhook accepts deliveries from any caller");
            }
            let (router, updates) = webhook_routes(config.telegram.webhook_secret.clone());
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.telegram.port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding webhook listener on {addr}"))?;
            eprintln!("   Webhook: http://{addr}{WEBHOOK_PATH}");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(error = %e, "Webhook server stopped");
                }
            });
            updates
        }
    };

    gate.announce().await;
    tracing::info!("🚀 Bot started successfully");
    gate.run(updates).await;

    Ok(())
}

/// Console plus append-only file output, filtered by `RUST_LOG` (default `info`).
fn init_tracing(log_file: &Path) -> anyhow::Result<WorkerGuard> {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = log_file
        .file_name()
        .with_context(|| format!("BOT_LOG has no file name: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}
