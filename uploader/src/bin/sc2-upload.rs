use clap::{Parser, Subcommand};
use eyre::{Context, bail};
use sc2_uploader::google_api::GoogleClient;
use sc2_uploader::uploaders::{DriveBackup, ReplayBackup, uploader_for};
use sc2_uploader::{
    BatchDecision, BatchObserver, Config, CredentialStore, Error, MetadataBuilder, OAuthManager,
    Pipeline, Provider, ResumableUploader, UploadReport, UploadStatus, VideoRecord,
};
use std::io::{BufRead, IsTerminal, Write};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Upload StarCraft II replay videos to YouTube")]
struct Cli {
    /// Configuration file; built-in defaults are used if it does not exist.
    #[arg(long, global = true, default_value = sc2_uploader::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage stored OAuth credentials.
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Upload every pending video in a manifest.
    Upload {
        /// JSON array of video records.
        manifest: PathBuf,

        /// Move on to the next video after a failure instead of asking.
        #[arg(long)]
        keep_going: bool,

        /// Write the records, with their final status, to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the metadata that would be sent for each video in a manifest.
    Preview { manifest: PathBuf },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    /// Run the browser consent flow and store the resulting credential.
    Login { provider: Provider },
    /// Refresh an expired credential.
    Refresh { provider: Provider },
    /// Report on every stored credential without changing any of them.
    Status,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    match cli.command {
        Command::Auth(command) => auth(&config, command).await,
        Command::Upload {
            manifest,
            keep_going,
            report,
        } => upload(&config, &manifest, keep_going, report.as_deref()).await,
        Command::Preview { manifest } => preview(&config, &manifest),
    }
}

fn credential_store(config: &Config) -> eyre::Result<CredentialStore> {
    let oauth = OAuthManager::new(&config.oauth.client_id, &config.oauth.client_secret)?;
    Ok(CredentialStore::new(&config.oauth.token_dir, oauth))
}

async fn auth(config: &Config, command: AuthCommand) -> eyre::Result<()> {
    let mut store = credential_store(config)?;
    match command {
        AuthCommand::Login { provider } => {
            if config.oauth.client_id.is_empty() {
                bail!("oauth.client_id is not set in {}", sc2_uploader::config::DEFAULT_CONFIG_FILE);
            }
            let credential = store.authenticate(provider).await?;
            println!("{provider}: logged in (expires {})", credential.expires_at());
        }
        AuthCommand::Refresh { provider } => {
            let credential = store.refresh(provider).await?;
            println!("{provider}: refreshed (expires {})", credential.expires_at());
        }
        AuthCommand::Status => {
            for status in store.check_all().await {
                println!("{status}");
            }
        }
    }
    Ok(())
}

fn read_manifest(config: &Config, path: &Path) -> eyre::Result<Vec<VideoRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest {}", path.display()))?;
    let mut records: Vec<VideoRecord> = serde_json::from_str(&text)
        .with_context(|| format!("parse manifest {}", path.display()))?;
    for record in &mut records {
        if record.playlist_ids.is_empty() {
            record.playlist_ids = config.playlists.defaults_for(record.matchup);
        }
    }
    Ok(records)
}

async fn upload(
    config: &Config,
    manifest: &Path,
    keep_going: bool,
    report: Option<&Path>,
) -> eyre::Result<()> {
    let mut records = read_manifest(config, manifest)?;
    let client = GoogleClient::new()?;
    let backup: Box<dyn ReplayBackup> = Box::new(DriveBackup::new(
        client.clone(),
        ResumableUploader::new(config.upload.max_retries),
        config.drive.replay_folder_id.clone(),
        config.upload.chunk_size(),
    ));
    let mut pipeline = Pipeline::new(
        credential_store(config)?,
        uploader_for(config, client),
        Some(backup),
        MetadataBuilder::from_config(config),
    );

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            watch_interrupts(&stop, tokio::signal::ctrl_c).await;
            tracing::error!("interrupted twice, aborting mid-upload");
            std::process::exit(130);
        }
    });

    let mut operator = Operator { keep_going, stop };
    let summary = pipeline.run_batch(&mut records, &mut operator).await;
    println!(
        "{} completed, {} failed, {} remaining",
        summary.completed, summary.failed, summary.remaining
    );

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json).with_context(|| format!("write report {}", path.display()))?;
    }
    if summary.failed > 0 {
        bail!("{} video(s) failed", summary.failed);
    }
    Ok(())
}

/// The person at the terminal.
struct Operator {
    keep_going: bool,
    stop: Arc<AtomicBool>,
}

impl BatchObserver for Operator {
    fn on_progress(&mut self, done: usize, total: usize, record: &VideoRecord, report: &UploadReport) {
        match record.status() {
            UploadStatus::Completed => println!(
                "[{done}/{total}] {} -> {}",
                record.title,
                record.video_id().unwrap_or_default()
            ),
            status => println!("[{done}/{total}] {} ({status})", record.title),
        }
        for warning in &report.warnings {
            println!("    warning: {warning}");
        }
    }

    fn on_failure(&mut self, record: &VideoRecord, error: &Error) -> BatchDecision {
        eprintln!("{} failed: {error}", record.title);
        if self.keep_going {
            return BatchDecision::Continue;
        }
        print!("continue? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return BatchDecision::Halt;
        }
        match answer.trim() {
            "y" | "Y" | "yes" => BatchDecision::Continue,
            _ => BatchDecision::Halt,
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

fn preview(config: &Config, manifest: &Path) -> eyre::Result<()> {
    let records = read_manifest(config, manifest)?;
    let builder = MetadataBuilder::from_config(config);
    let now = jiff::Timestamp::now();
    for record in &records {
        let metadata = builder.video_metadata(record, record.replay_url(), now);
        println!("== {} ({})", metadata.title, record.status());
        println!("privacy: {}", metadata.privacy);
        match metadata.publish_at {
            Some(at) => println!("publish at: {at}"),
            None => println!("publish at: immediately"),
        }
        println!("tags: {}", metadata.tags.join(", "));
        println!("playlists: {}", record.playlist_ids.join(", "));
        println!("{}", metadata.description);
        for (language, text) in builder.localizations(record, record.replay_url()) {
            println!("-- {language}: {}", text.title);
        }
        println!();
    }
    Ok(())
}

/// Sets `stop` on the first interrupt and returns on the second.
///
/// Never returns if interrupts cannot be listened for.
async fn watch_interrupts<F, Fut>(stop: &AtomicBool, mut interrupt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = interrupt().await {
        tracing::warn!(error = %e, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
    tracing::warn!("stop requested; finishing the current video first (interrupt again to abort)");
    stop.store(true, Ordering::SeqCst);
    if let Err(e) = interrupt().await {
        tracing::warn!(error = %e, "cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
}
