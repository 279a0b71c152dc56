use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chunkput::config::{
    DEFAULT_ALLOW_ORIGIN, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_RETRIES,
};
use chunkput::{
    BatchItem, BatchOptions, CompressionFormat, MultipartResult, ObjectStoreUrlProvider,
    PresignRequest, ProgressCallback, ProgressEvent, TransportResponse, UploadError,
    UploadSession, UploadSource, UploadUrls, Uploader, UploaderOptions,
};

#[derive(Parser)]
#[command(name = "chunkput", about = "Upload files through presigned URLs")]
pub struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOptions {
    #[arg(long, global = true, env = "CHUNKPUT_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    #[arg(long, global = true, env = "CHUNKPUT_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[arg(long, global = true, env = "CHUNKPUT_RETRIES", default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Per-request timeout; the buffered paths default to 89 seconds.
    #[arg(long, global = true, env = "CHUNKPUT_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// gzip, deflate, deflate-raw or none.
    #[arg(long, global = true, env = "CHUNKPUT_COMPRESSION", default_value = "gzip")]
    pub compression: String,

    #[arg(long, global = true, env = "CHUNKPUT_ALLOW_ORIGIN", default_value = DEFAULT_ALLOW_ORIGIN)]
    pub allow_origin: String,

    #[arg(long, global = true, env = "CHUNKPUT_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Chunked upload through a pre-issued multipart URL set.
    Multipart {
        #[arg(long)]
        file: PathBuf,
        /// JSON file holding `{ "urls": [...], "upload_id": "..." }`.
        #[arg(long)]
        urls: PathBuf,
        #[arg(long, env = "CHUNKPUT_COMPLETION_URL")]
        completion_url: String,
        #[arg(long, env = "CHUNKPUT_ABORT_URL")]
        abort_url: String,
        /// Path reported to the backend, the file name by default.
        #[arg(long)]
        asset_path: Option<String>,
    },
    /// Whole-file upload to one URL, or to one signed from the environment.
    Put {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, conflicts_with_all = ["bucket", "key"])]
        url: Option<String>,
        #[arg(long, requires = "key")]
        bucket: Option<String>,
        #[arg(long, requires = "bucket")]
        key: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Many files, each to its own URL.
    Batch {
        /// JSON list of `{ "file": ..., "url": ... }`.
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[derive(Deserialize)]
struct ManifestEntry {
    file: PathBuf,
    url: String,
}

impl GlobalOptions {
    fn uploader_options(&self) -> chunkput::Result<UploaderOptions> {
        let mut options = UploaderOptions::default()
            .with_chunk_size(self.chunk_size)
            .with_concurrency(self.concurrency)
            .with_retries(self.retries)
            .with_compression(CompressionFormat::parse_setting(&self.compression)?)
            .with_allow_origin(self.allow_origin.clone());
        if let Some(ms) = self.timeout_ms {
            let timeout = Some(Duration::from_millis(ms));
            options = options.with_timeout(timeout).with_buffered_timeout(timeout);
        }
        Ok(options)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn response_json(response: &TransportResponse) -> Value {
    json!({
        "status": response.status,
        "etag": response.etag,
        "body": response.json().unwrap_or_else(|| {
            Value::String(String::from_utf8_lossy(&response.body).into_owned())
        }),
    })
}

fn optional_response_json(response: Option<&TransportResponse>) -> Value {
    response.map(response_json).unwrap_or(Value::Null)
}

fn log_progress() -> ProgressCallback {
    Arc::new(|event: ProgressEvent| info!(?event, "progress"))
}

async fn run(cli: Cli, cancel: CancellationToken) -> chunkput::Result<Value> {
    let uploader = Uploader::new(cli.options.uploader_options()?)?;

    match cli.command {
        Command::Multipart {
            file,
            urls,
            completion_url,
            abort_url,
            asset_path,
        } => {
            let urls: UploadUrls = serde_json::from_slice(&tokio::fs::read(&urls).await?)?;
            let upload_id = urls
                .upload_id
                .clone()
                .ok_or_else(|| UploadError::precondition("url set carries no upload id"))?;
            let source = UploadSource::open(&file).await?;
            let session = UploadSession {
                upload_id,
                completion_url,
                abort_url,
                file_path: asset_path.unwrap_or_else(|| source.name.clone()),
            };

            let result = uploader
                .multipart_upload(source, &urls, &session, Some(log_progress()), &cancel)
                .await?;
            Ok(match &result {
                MultipartResult::Completed(response) => json!({
                    "aborted": false,
                    "response": response_json(response),
                }),
                MultipartResult::Aborted(aborted) => json!({
                    "aborted": true,
                    "reason": aborted.reason.to_string(),
                    "response": optional_response_json(aborted.response.as_ref()),
                }),
            })
        }
        Command::Put {
            file,
            url,
            bucket,
            key,
            folder,
        } => {
            let source = UploadSource::open(&file).await?;
            let response = match (url, bucket, key) {
                (Some(url), _, _) => uploader.upload_with_presigned_url(source, &url).await?,
                (None, Some(bucket), Some(key)) => {
                    let provider = ObjectStoreUrlProvider::from_env(bucket.clone())?;
                    let mut request = PresignRequest::single(bucket, key)
                        .with_content_type(source.content_type.clone());
                    if let Some(folder) = folder {
                        request = request.with_folder(folder);
                    }
                    uploader
                        .upload_via_provider(&provider, &request, source)
                        .await?
                }
                _ => {
                    return Err(UploadError::precondition(
                        "either --url or --bucket with --key is required",
                    ))
                }
            };
            Ok(json!({ "response": optional_response_json(response.as_ref()) }))
        }
        Command::Batch { manifest } => {
            let entries: Vec<ManifestEntry> =
                serde_json::from_slice(&tokio::fs::read(&manifest).await?)?;
            let mut items = Vec::with_capacity(entries.len());
            for entry in entries {
                items.push(BatchItem::new(UploadSource::open(&entry.file).await?, entry.url));
            }

            let outcomes = uploader
                .buffered_files_upload(items, BatchOptions::default(), Some(log_progress()), &cancel)
                .await?;
            let files: Vec<Value> = outcomes
                .iter()
                .map(|outcome| {
                    json!({
                        "name": outcome.name,
                        "response": optional_response_json(outcome.response.as_ref()),
                    })
                })
                .collect();
            Ok(json!({ "files": files }))
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.options.log_json);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling upload");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(result) => println!("{result}"),
        Err(e) => {
            error!(error = %e, code = e.code(), "upload failed");
            println!("{}", json!({ "error": e.to_string(), "code": e.code() }));
            std::process::exit(1);
        }
    }
}
