use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use matchreel_core::stream::StreamFilter;
use matchreel_core::{
    load_matchreel_config, DeleteOutcome, HttpProviderClient, IngestError, MatchreelConfig,
    PlaybackUrlBuilder, PlaybackUrls, QualityTier, RetryPolicy, SqliteStreamStore,
    StatusTransition, StreamRepository, StreamStatus, SubmissionOrchestrator, SubmissionOutcome,
    SubmissionRequest, VideoStream, WebhookOutcome, WebhookProcessor,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] matchreel_core::ConfigError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("store error: {0}")]
    Store(#[from] matchreel_core::StoreError),
    #[error("provider error: {0}")]
    Provider(#[from] matchreel_core::ProviderError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required setting missing: {0}")]
    MissingSetting(&'static str),
    #[error("webhook rejected: {0}")]
    WebhookRejected(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "matchreel video ingestion control interface", long_about = None)]
pub struct Cli {
    /// Path to matchreel.toml
    #[arg(long, default_value = "configs/matchreel.toml")]
    pub config: PathBuf,
    /// Override for storage.database
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Local operator token, required when MATCHREELCTL_TOKEN is set
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates the stream database and its schema
    Init,
    /// Validates an upload and submits it for transcoding
    Submit(SubmitArgs),
    /// Applies a provider webhook payload
    Webhook(WebhookArgs),
    /// Shows one stream
    Status(StatusArgs),
    /// Lists streams, newest first
    List(ListArgs),
    /// Marks a stream cancelled without touching the provider
    Cancel(StreamArgs),
    /// Removes a stream and releases its provider asset when unshared
    Delete(StreamArgs),
    /// Prints a signed HLS URL for a playback id
    Sign(SignArgs),
    /// Prints the playback and thumbnail URLs for a playback id
    Urls(UrlsArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Local stream id assigned by the caller
    #[arg(long = "id")]
    pub stream_id: String,
    /// Uploaded video file
    pub file: PathBuf,
    #[arg(long, default_value = "standard", value_parser = parse_quality)]
    pub quality: QualityTier,
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(Args, Debug)]
pub struct WebhookArgs {
    /// JSON payload file; stdin when omitted
    #[arg(long)]
    pub payload: Option<PathBuf>,
    /// Signature header value (`t=<unix>,v1=<hex>`)
    #[arg(long)]
    pub signature: Option<String>,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    pub stream_id: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub stream_id: String,
    /// Include the status history
    #[arg(long, default_value_t = false)]
    pub history: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_parser = parse_status)]
    pub status: Option<StreamStatus>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    pub playback_id: String,
    /// Validity window in seconds; playback.signed_url_ttl_seconds by default
    #[arg(long)]
    pub ttl: Option<u64>,
    /// Signing key; playback.signing_key by default
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args, Debug)]
pub struct UrlsArgs {
    pub playback_id: String,
}

fn parse_quality(value: &str) -> std::result::Result<QualityTier, String> {
    value.parse()
}

fn parse_status(value: &str) -> std::result::Result<StreamStatus, String> {
    value.parse()
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Init => render(&context.init()?, cli.format)?,
        Commands::Submit(args) => {
            let outcome = runtime()?.block_on(context.submit(args))?;
            render(&SubmitReport(outcome), cli.format)?;
        }
        Commands::Webhook(args) => {
            let body = read_payload(args.payload.as_ref())?;
            let outcome =
                runtime()?.block_on(context.webhook(args.signature.as_deref(), &body))?;
            render(&outcome, cli.format)?;
            if let WebhookOutcome::Rejected { reason } = outcome {
                return Err(AppError::WebhookRejected(reason));
            }
        }
        Commands::Status(args) => render(&context.status(args)?, cli.format)?,
        Commands::List(args) => render(&context.list(args)?, cli.format)?,
        Commands::Cancel(args) => {
            let stream = context.orchestrator()?.cancel(&args.stream_id)?;
            render(
                &StreamView {
                    stream,
                    history: None,
                },
                cli.format,
            )?;
        }
        Commands::Delete(args) => {
            let outcome = runtime()?.block_on(context.orchestrator()?.delete(&args.stream_id))?;
            render(&outcome, cli.format)?;
        }
        Commands::Sign(args) => render(&context.sign(args)?, cli.format)?,
        Commands::Urls(args) => render(&context.urls(args), cli.format)?,
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("MATCHREELCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn read_payload(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    match path {
        Some(path) => Ok(fs::read(path)?),
        None => {
            let mut body = Vec::new();
            std::io::stdin().read_to_end(&mut body)?;
            Ok(body)
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: MatchreelConfig,
    database: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_matchreel_config(&cli.config)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        debug!(config = %cli.config.display(), database = %database.display(), "context ready");
        Ok(Self { config, database })
    }

    fn store(&self) -> Result<Arc<SqliteStreamStore>> {
        let store = SqliteStreamStore::builder()
            .path(&self.database)
            .create_if_missing(false)
            .build()?;
        Ok(Arc::new(store))
    }

    fn provider(&self) -> Result<Arc<HttpProviderClient>> {
        let client = HttpProviderClient::new(
            &self.config.provider,
            self.config.profiles.clone(),
            RetryPolicy::from(&self.config.retry),
        )?;
        Ok(Arc::new(client))
    }

    fn orchestrator(&self) -> Result<SubmissionOrchestrator> {
        Ok(SubmissionOrchestrator::from_config(
            &self.config,
            self.store()?,
            self.provider()?,
        ))
    }

    fn init(&self) -> Result<InitReport> {
        let existed = self.database.exists();
        let store = SqliteStreamStore::builder()
            .path(&self.database)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        Ok(InitReport {
            database: self.database.clone(),
            created: !existed,
        })
    }

    async fn submit(&self, args: &SubmitArgs) -> Result<SubmissionOutcome> {
        let outcome = self
            .orchestrator()?
            .submit(SubmissionRequest {
                local_stream_id: args.stream_id.clone(),
                file_path: args.file.clone(),
                quality: args.quality,
                title: args.title.clone(),
            })
            .await?;
        Ok(outcome)
    }

    async fn webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        let processor =
            WebhookProcessor::from_config(&self.config, self.store()?, self.provider()?);
        Ok(processor.process_signed(signature, body).await)
    }

    fn status(&self, args: &StatusArgs) -> Result<StreamView> {
        let store = self.store()?;
        let stream = store
            .get(&args.stream_id)?
            .ok_or_else(|| IngestError::NotFound {
                stream_id: args.stream_id.clone(),
            })?;
        let history = if args.history {
            Some(store.history(&args.stream_id)?)
        } else {
            None
        };
        Ok(StreamView { stream, history })
    }

    fn list(&self, args: &ListArgs) -> Result<StreamList> {
        let rows = self.store()?.list(&StreamFilter {
            status: args.status,
            limit: Some(args.limit),
        })?;
        Ok(StreamList { rows })
    }

    fn urls(&self, args: &UrlsArgs) -> PlaybackUrls {
        PlaybackUrlBuilder::from_config(&self.config.playback).build(&args.playback_id)
    }

    fn sign(&self, args: &SignArgs) -> Result<SignedUrl> {
        let key = args
            .key
            .clone()
            .or_else(|| self.config.playback.signing_key.clone())
            .ok_or(AppError::MissingSetting("playback.signing_key"))?;
        let ttl = args
            .ttl
            .unwrap_or(self.config.playback.signed_url_ttl_seconds);
        let url = PlaybackUrlBuilder::from_config(&self.config.playback)
            .generate_signed_playback_url(&args.playback_id, &key, ttl)?;
        Ok(SignedUrl {
            playback_id: args.playback_id.clone(),
            ttl_seconds: ttl,
            url,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub database: PathBuf,
    pub created: bool,
}

impl DisplayFallback for InitReport {
    fn display(&self) -> String {
        if self.created {
            format!("created {}", self.database.display())
        } else {
            format!("schema up to date in {}", self.database.display())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct SubmitReport(pub SubmissionOutcome);

impl DisplayFallback for SubmitReport {
    fn display(&self) -> String {
        let stream = &self.0.stream;
        let mut line = format!(
            "{} status={} asset={}",
            stream.local_stream_id,
            stream.status,
            stream.provider_asset_id.as_deref().unwrap_or("-")
        );
        if let Some(source) = &self.0.source_stream_id {
            let _ = write!(line, " (reused from {source})");
        }
        line
    }
}

#[derive(Debug, Serialize)]
pub struct StreamView {
    #[serde(flatten)]
    pub stream: VideoStream,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<StatusTransition>>,
}

impl DisplayFallback for StreamView {
    fn display(&self) -> String {
        let stream = &self.stream;
        let mut lines = vec![
            format!("Stream: {}", stream.local_stream_id),
            format!("  status: {} ({}%)", stream.status, stream.progress),
            format!("  quality: {}", stream.quality),
        ];
        if let Some(title) = &stream.title {
            lines.push(format!("  title: {title}"));
        }
        if let Some(asset) = &stream.provider_asset_id {
            lines.push(format!("  asset: {asset}"));
        }
        if let Some(playback) = &stream.provider_playback_id {
            lines.push(format!("  playback: {playback}"));
        }
        if let Some(duration) = stream.duration {
            lines.push(format!("  duration: {duration:.1}s"));
        }
        if !stream.resolutions.is_empty() {
            lines.push(format!("  resolutions: {}", stream.resolutions.join(", ")));
        }
        if let Some(urls) = &stream.urls {
            lines.push(format!("  hls: {}", urls.hls));
        }
        if let Some(reason) = &stream.failure_reason {
            lines.push(format!("  failure: {reason}"));
        }
        if let Some(history) = &self.history {
            lines.push("History:".to_string());
            for transition in history {
                let from = transition
                    .from
                    .map(|status| status.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let at = transition
                    .recorded_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default();
                lines.push(format!(
                    "  {at} {from} -> {} {}",
                    transition.to,
                    transition.note.as_deref().unwrap_or("")
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StreamList {
    pub rows: Vec<VideoStream>,
}

impl DisplayFallback for StreamList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No streams found".to_string();
        }
        self.rows
            .iter()
            .map(|stream| {
                format!(
                    "{} | {} | status={} | progress={}% | quality={}",
                    stream.local_stream_id,
                    stream.title.as_deref().unwrap_or("<untitled>"),
                    stream.status,
                    stream.progress,
                    stream.quality
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for WebhookOutcome {
    fn display(&self) -> String {
        match self {
            WebhookOutcome::Applied {
                event_type,
                asset_id,
                updated,
                skipped,
            } => format!(
                "{event_type} for {asset_id}: updated [{}], unchanged [{}]",
                updated.join(", "),
                skipped.join(", ")
            ),
            WebhookOutcome::UnknownAsset {
                event_type,
                asset_id,
            } => format!("{event_type}: no stream uses asset {asset_id}"),
            WebhookOutcome::Ignored { event_type } => format!("{event_type}: ignored"),
            WebhookOutcome::Rejected { reason } => format!("rejected: {reason}"),
            WebhookOutcome::Failed { asset_id, reason } => {
                format!("failed for {asset_id}: {reason}")
            }
        }
    }
}

impl DisplayFallback for DeleteOutcome {
    fn display(&self) -> String {
        match (&self.provider_asset_id, self.provider_cleanup) {
            (Some(asset), true) => format!(
                "deleted {} and requested deletion of asset {asset}",
                self.local_stream_id
            ),
            (Some(asset), false) => format!(
                "deleted {}; asset {asset} is still shared",
                self.local_stream_id
            ),
            (None, _) => format!("deleted {}", self.local_stream_id),
        }
    }
}

impl DisplayFallback for PlaybackUrls {
    fn display(&self) -> String {
        [
            format!("hls: {}", self.hls),
            format!("dash: {}", self.dash),
            format!("thumbnail: {}", self.thumbnail),
            format!("poster: {}", self.poster),
            format!("thumbnail_small: {}", self.thumbnail_small),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SignedUrl {
    pub playback_id: String,
    pub ttl_seconds: u64,
    pub url: String,
}

impl DisplayFallback for SignedUrl {
    fn display(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use matchreel_core::stream::NewStream;
    use tempfile::TempDir;

    fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let configs_dir = temp.path().join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        let config = fs::read_to_string("../configs/matchreel.toml")
            .unwrap()
            .replace(
                "# signing_key = \"replace-with-playback-signing-key\"",
                "signing_key = \"test-playback-key\"",
            );
        fs::write(configs_dir.join("matchreel.toml"), config).unwrap();

        let cli = Cli {
            config: configs_dir.join("matchreel.toml"),
            database: Some(temp.path().join("data/streams.sqlite")),
            token: None,
            format: OutputFormat::Json,
            verbose: false,
            command: Commands::Init,
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn init_creates_schema_once() {
        let (_temp, context) = prepare_test_context().unwrap();
        assert!(context.init().unwrap().created);
        assert!(!context.init().unwrap().created);
    }

    #[test]
    fn list_and_status_read_registered_streams() {
        let (_temp, context) = prepare_test_context().unwrap();
        context.init().unwrap();
        context
            .store()
            .unwrap()
            .register(&NewStream {
                local_stream_id: "stream-1".into(),
                title: Some("Derby".into()),
                quality: QualityTier::Premium,
                file_size: 42,
                format: "mp4".into(),
                uploaded_at: Utc::now(),
            })
            .unwrap();

        let list = context
            .list(&ListArgs {
                status: Some(StreamStatus::Queued),
                limit: 5,
            })
            .unwrap();
        assert_eq!(list.rows.len(), 1);
        assert_eq!(list.rows[0].local_stream_id, "stream-1");

        let view = context
            .status(&StatusArgs {
                stream_id: "stream-1".into(),
                history: true,
            })
            .unwrap();
        assert_eq!(view.stream.quality, QualityTier::Premium);
        assert_eq!(view.history.unwrap().len(), 1);

        let err = context
            .status(&StatusArgs {
                stream_id: "missing".into(),
                history: false,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Ingest(IngestError::NotFound { .. })));
    }

    #[test]
    fn status_without_database_reports_open_failure() {
        let (_temp, context) = prepare_test_context().unwrap();
        let err = context
            .status(&StatusArgs {
                stream_id: "stream-1".into(),
                history: false,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
    }

    #[test]
    fn sign_uses_configured_key_and_ttl() {
        let (_temp, context) = prepare_test_context().unwrap();
        let signed = context
            .sign(&SignArgs {
                playback_id: "pb1".into(),
                ttl: None,
                key: None,
            })
            .unwrap();
        assert_eq!(signed.ttl_seconds, 3600);
        assert!(signed.url.starts_with("https://stream.mux.com/pb1.m3u8?token="));
        assert!(signed.url.contains("&exp="));
    }

    #[test]
    fn urls_follow_configured_hosts() {
        let (_temp, context) = prepare_test_context().unwrap();
        let urls = context.urls(&UrlsArgs {
            playback_id: "pb1".into(),
        });
        assert_eq!(urls.hls, "https://stream.mux.com/pb1.m3u8");
        assert_eq!(urls.thumbnail, "https://image.mux.com/pb1/thumbnail.jpg");
    }

    #[test]
    fn quality_and_status_arguments_parse_case_insensitively() {
        let cli = Cli::try_parse_from([
            "matchreelctl",
            "submit",
            "--id",
            "stream-9",
            "--quality",
            "ULTRA",
            "final.mp4",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit(args) => assert_eq!(args.quality, QualityTier::Ultra),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["matchreelctl", "list", "--status", "bogus"]).is_err());
    }
}
