//! rumo-sync command line
//!
//! Run with: rumo-sync [--project DIR] <watch|upload-all|list|diagnose>

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rumo_core::diagnostics::diagnose_endpoint;
use rumo_sync::{
    AppError, AppResult, LogNotifier, MemoryTransport, NotificationSink, SftpTransport,
    Ssh2Transport, SyncCoordinator, SyncSettings,
};

#[derive(Parser, Debug)]
#[command(name = "rumo-sync")]
#[command(about = "Mirror a build-output directory to an SFTP server")]
struct Cli {
    /// Project root; the watched directory and config file are resolved below it
    #[arg(long, env = "RUMO_PROJECT", default_value = ".")]
    project: PathBuf,

    /// Watched directory, relative to the project root
    #[arg(long, env = "RUMO_WATCHED_DIR", default_value = rumo_sync::DEFAULT_WATCHED_DIR)]
    watched_dir: PathBuf,

    /// Endpoint config file, relative to the project root
    #[arg(long, env = "RUMO_CONFIG", default_value = rumo_sync::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Quiet period per file before a change is uploaded
    #[arg(long, env = "RUMO_DEBOUNCE_MS", default_value = "1000")]
    debounce_ms: u64,

    /// Talk to an in-memory remote instead of a real server
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "RUMO_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the build output and mirror every change until Ctrl-C
    Watch,
    /// Upload every tracked file once and exit
    UploadAll,
    /// List a remote directory, relative to the remote root
    List {
        #[arg(default_value = "")]
        dir: String,
    },
    /// Check DNS, TCP and the SSH banner of the configured endpoint
    Diagnose {
        /// Per-step timeout in seconds
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let mut settings = SyncSettings::new(cli.project.clone());
    settings.watched_dir = cli.watched_dir.clone();
    settings.config_file = cli.config.clone();
    settings.debounce = Duration::from_millis(cli.debounce_ms);
    settings.watch_config = matches!(cli.command, Command::Watch);

    let transport: Box<dyn SftpTransport> = if cli.dry_run {
        info!("Dry run: using in-memory remote");
        Box::new(MemoryTransport::new())
    } else {
        Box::new(Ssh2Transport::new())
    };
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);
    let coordinator = SyncCoordinator::new(settings, transport, notifier);

    let result = match cli.command {
        Command::Watch => watch(&coordinator).await,
        Command::UploadAll => upload_all(&coordinator).await,
        Command::List { dir } => list(&coordinator, &dir).await,
        Command::Diagnose { timeout_secs } => {
            diagnose(&coordinator, Duration::from_secs(timeout_secs)).await
        }
    };
    coordinator.dispose().await;
    result
}

async fn watch(coordinator: &SyncCoordinator) -> AppResult<()> {
    if !coordinator.initialize().await {
        info!("Not watching yet; waiting for a usable SFTP configuration");
    }
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Failed(format!("Cannot listen for Ctrl-C: {e}")))?;
    info!("Shutting down");
    Ok(())
}

async fn connect(coordinator: &SyncCoordinator) -> AppResult<()> {
    let client = coordinator.client();
    if !client.load_config().await {
        return Err(AppError::Failed(format!(
            "SFTP configuration missing or invalid: {}",
            coordinator.settings().config_path().display()
        )));
    }
    client.connect().await?;
    Ok(())
}

async fn upload_all(coordinator: &SyncCoordinator) -> AppResult<()> {
    connect(coordinator).await?;
    let report = coordinator.upload_all_files().await?;
    if report.is_success() {
        Ok(())
    } else {
        Err(AppError::Failed(report.summary()))
    }
}

async fn list(coordinator: &SyncCoordinator, dir: &str) -> AppResult<()> {
    connect(coordinator).await?;
    let entries = coordinator.client().list_remote(dir).await?;
    for entry in entries {
        let kind = if entry.is_dir { "d" } else { "-" };
        println!("{} {:>10} {}", kind, entry.size, entry.path);
    }
    Ok(())
}

async fn diagnose(coordinator: &SyncCoordinator, timeout: Duration) -> AppResult<()> {
    let client = coordinator.client();
    client.load_config().await;
    let config = client.config().ok_or_else(|| {
        AppError::Failed(format!(
            "SFTP configuration missing or invalid: {}",
            coordinator.settings().config_path().display()
        ))
    })?;

    let host = config.host.clone();
    let port = config.port;
    let report = tokio::task::spawn_blocking(move || diagnose_endpoint(&host, port, timeout))
        .await
        .map_err(|e| AppError::Failed(format!("Diagnostics task failed: {e}")))?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| AppError::Failed(format!("Cannot render report: {e}")))?;
    println!("{json}");
    if report.passed() {
        Ok(())
    } else {
        Err(AppError::Failed(report.summary.clone()))
    }
}
