//! Many small files, each buffered whole and sent to its own URL.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::chunk::{compress_bytes, UploadSource};
use crate::config::{CompressionFormat, UploaderOptions};
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::progress::{Progress, ProgressCallback, ProgressEvent};
use crate::transfer::{upload_buffer, TransferOptions};
use crate::transport::{Transport, TransportResponse};

pub struct BatchItem {
    pub source: UploadSource,
    pub url: String,
}

impl BatchItem {
    pub fn new(source: UploadSource, url: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
        }
    }
}

/// Per-call overrides for the batch path. Unset fields fall back to the
/// uploader's options.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub timeout: Option<Duration>,
    /// `Some(None)` disables compression for this call.
    pub compression: Option<Option<CompressionFormat>>,
    pub concurrency: Option<usize>,
}

impl BatchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_compression(mut self, compression: Option<CompressionFormat>) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub name: String,
    /// `None` when the file could not be read or its transfer failed.
    pub response: Option<TransportResponse>,
}

type FileResult = (usize, Option<TransportResponse>);

fn record(
    settled: Vec<std::result::Result<FileResult, tokio::task::JoinError>>,
    outcomes: &mut [BatchOutcome],
    progress: &Progress,
) {
    for result in settled {
        match result {
            Ok((index, response)) => {
                let outcome = &mut outcomes[index];
                if response.is_some() {
                    progress.emit(ProgressEvent::File {
                        name: outcome.name.clone(),
                        percent: 100,
                    });
                }
                outcome.response = response;
            }
            Err(e) => error!(error = %e, "file transfer task did not settle"),
        }
    }
}

/// Outcomes are returned in input order. A failed file never stops the others.
#[instrument(skip_all, fields(files = items.len()))]
pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    options: &UploaderOptions,
    items: Vec<BatchItem>,
    overrides: BatchOptions,
    on_progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<Vec<BatchOutcome>> {
    let compression = overrides.compression.unwrap_or(options.compression);
    let timeout = overrides.timeout.or(options.buffered_timeout);
    let concurrency = overrides.concurrency.unwrap_or(options.concurrency);

    let progress = Progress::new(on_progress, 0);
    let mut outcomes: Vec<BatchOutcome> = items
        .iter()
        .map(|item| BatchOutcome {
            name: item.source.name.clone(),
            response: None,
        })
        .collect();
    for outcome in &outcomes {
        progress.emit(ProgressEvent::File {
            name: outcome.name.clone(),
            percent: 0,
        });
    }

    let mut gate: ConcurrencyGate<FileResult> = ConcurrencyGate::new(concurrency);
    for (index, item) in items.into_iter().enumerate() {
        record(gate.settled(), &mut outcomes, &progress);
        if cancel.is_cancelled() {
            break;
        }

        let BatchItem { source, url } = item;
        let mut transfer = TransferOptions::for_buffer(options, &source.content_type, compression);
        transfer.timeout = timeout;

        let name = source.name.clone();
        let body = match source.read_all().await {
            Ok(raw) => match compression {
                Some(format) => compress_bytes(&raw, format),
                None => Ok(raw),
            },
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!(file = %name, error = %e, "skipping unreadable file");
                continue;
            }
        };

        debug!(file = %name, len = body.len(), "dispatching file");
        let transport = Arc::clone(&transport);
        let token = cancel.clone();
        let dispatched = gate
            .dispatch(
                async move {
                    let response =
                        upload_buffer(transport.as_ref(), &url, body, &transfer, &token).await;
                    (index, response)
                },
                cancel,
            )
            .await;
        if dispatched.is_err() {
            break;
        }
    }

    let settled = gate.join_all(cancel).await;
    record(settled, &mut outcomes, &progress);

    Ok(outcomes)
}
