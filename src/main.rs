use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use crowdpad::config::{self, Settings};
use crowdpad::emulator::HeadlessBackend;
use crowdpad::library;
use crowdpad::render::DirectoryPublisher;
use crowdpad::session::SessionController;
use crowdpad::transport::ConsoleTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Channel id used for frames when none is configured
const CONSOLE_CHANNEL: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let settings = config::load_or_create(&config_path)
        .await
        .wrap_err_with(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Using config: {}", config_path.display());

    let glyphs = settings
        .glyph_map()
        .map_err(|e| eyre!("Invalid controls: {}", e))?;
    let channel_id = settings.channel_id.unwrap_or(CONSOLE_CHANNEL);
    let publisher = Arc::new(DirectoryPublisher::new(
        settings.render.output_dir.clone(),
        channel_id,
        settings.render.screen_scale,
    ));
    info!("Publishing frames to {}", publisher.dir().display());

    let controller = SessionController::new(
        settings.session_settings(),
        glyphs,
        Arc::new(HeadlessBackend),
        publisher,
    );

    auto_start(&controller, &settings).await;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            ctrl_c_token.cancel();
        }
    });

    let transport = ConsoleTransport::new(
        controller.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        channel_id,
    );
    let result = transport.run(token).await;

    controller.stop().await;
    result.wrap_err("Console transport failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn auto_start(controller: &SessionController<DirectoryPublisher>, settings: &Settings) {
    let Some(rom) = &settings.default_rom else {
        return;
    };
    if let Err(e) = library::resolve_rom(&settings.games_dir, rom).await {
        warn!("Default ROM not started: {}", e);
        return;
    }
    match controller.start(rom).await {
        Ok(()) => info!("Auto-started default ROM: {}", rom),
        Err(e) => warn!("Failed to auto-start {}: {}", rom, e),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
