//! Streams a source through the chunker and the concurrency gate.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chunk::{pipeline, Chunker, UploadSource};
use crate::config::UploaderOptions;
use crate::error::{Result, UploadError};
use crate::gate::ConcurrencyGate;
use crate::progress::{Progress, ProgressEvent};
use crate::transfer::{upload_chunk, TransferOptions};
use crate::transport::Transport;
use crate::upload::{CompletionToken, FailureReason, UploadUrls};

type PartResult = (u32, Option<CompletionToken>);

#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    /// Every dispatched part succeeded, tokens ordered by part number.
    Done(Vec<CompletionToken>),
    Failed(FailureReason),
}

/// Chunks needed for `file_size` bytes without compression.
pub fn required_parts(file_size: u64, chunk_size: usize) -> u64 {
    file_size.div_ceil(chunk_size.max(1) as u64)
}

/// Reject URL sets that cannot carry the file. One URL beyond the estimate is
/// required as slack for compression overhead.
pub(crate) fn check_urls(urls: &UploadUrls, file_size: u64, chunk_size: usize) -> Result<()> {
    let estimated = required_parts(file_size, chunk_size);
    if (urls.urls.len() as u64) <= estimated {
        return Err(UploadError::precondition(format!(
            "Invalid presigned urls: {} supplied, more than {estimated} required",
            urls.urls.len()
        )));
    }
    if urls.urls.iter().any(|url| url.trim().is_empty()) {
        return Err(UploadError::precondition("Invalid presigned url."));
    }
    Ok(())
}

/// Bookkeeping for dispatched parts.
#[derive(Default)]
struct PartLedger {
    tokens: BTreeMap<u32, CompletionToken>,
    source_bytes: HashMap<u32, u64>,
    dispatched: u32,
    failure: Option<FailureReason>,
}

impl PartLedger {
    fn dispatched(&mut self, part_no: u32, source_bytes: u64) {
        self.dispatched += 1;
        self.source_bytes.insert(part_no, source_bytes);
    }

    fn fail(&mut self, reason: FailureReason) {
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    /// Record settled transfers. With `cancelled` set, a transfer that gave up
    /// is put down to the cancellation rather than to its part.
    fn reap(
        &mut self,
        settled: Vec<std::result::Result<PartResult, JoinError>>,
        cancelled: bool,
        progress: &mut Progress,
    ) {
        for result in settled {
            match result {
                Ok((part_no, Some(token))) => {
                    let source_bytes = self.source_bytes.remove(&part_no).unwrap_or_default();
                    self.tokens.insert(part_no, token);
                    progress.chunk_uploaded(part_no, source_bytes);
                }
                Ok((_, None)) if cancelled => self.fail(FailureReason::Cancelled),
                Ok((part_no, None)) => {
                    warn!(part_no, "chunk exhausted its retries");
                    self.fail(FailureReason::ChunkFailed { part_no });
                }
                Err(e) => {
                    error!(error = %e, "chunk transfer task did not settle");
                    self.fail(FailureReason::TaskLost(e.to_string()));
                }
            }
        }
    }

    fn finish(self) -> Outcome {
        if let Some(reason) = self.failure {
            return Outcome::Failed(reason);
        }
        if self.tokens.len() != self.dispatched as usize {
            let part_no = (1..=self.dispatched)
                .find(|p| !self.tokens.contains_key(p))
                .unwrap_or_default();
            return Outcome::Failed(FailureReason::ChunkFailed { part_no });
        }
        Outcome::Done(self.tokens.into_values().collect())
    }
}

/// Read, optionally compress, chunk and upload `source`.
///
/// A slot is reserved before every read. Once a transfer has failed no
/// further chunk is dispatched and outstanding transfers are aborted.
pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    options: &UploaderOptions,
    urls: &UploadUrls,
    source: UploadSource,
    progress: &mut Progress,
    cancel: &CancellationToken,
) -> Outcome {
    let chunk_options = TransferOptions::for_chunks(options);
    let consumed = Arc::new(AtomicU64::new(0));
    let blocks = pipeline(source.into_blocks(), options.compression, Arc::clone(&consumed));
    let mut chunker = Chunker::new(blocks, options.chunk_size);
    let mut gate: ConcurrencyGate<PartResult> = ConcurrencyGate::new(options.concurrency);
    let mut ledger = PartLedger::default();
    // Part number of the first failed transfer, 0 while none failed. Set
    // before the failing transfer releases its slot.
    let failed_part = Arc::new(AtomicU32::new(0));
    let mut reported = 0u64;

    progress.started();

    loop {
        if cancel.is_cancelled() {
            ledger.fail(FailureReason::Cancelled);
            break;
        }
        ledger.reap(gate.settled(), false, progress);
        if ledger.failure.is_some() {
            break;
        }

        let slot = match gate.reserve(cancel).await {
            Ok(slot) => slot,
            Err(_) => {
                ledger.fail(FailureReason::Cancelled);
                break;
            }
        };
        match failed_part.load(Ordering::SeqCst) {
            0 => {}
            part_no => {
                warn!(part_no, "chunk exhausted its retries");
                ledger.fail(FailureReason::ChunkFailed { part_no });
                break;
            }
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ledger.fail(FailureReason::Cancelled);
                break;
            }
            next = chunker.next_chunk() => next,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                error!(error = %e, "failed to read upload source");
                ledger.fail(FailureReason::Source(e.to_string()));
                break;
            }
        };

        let Some(target) = urls.target(chunk.part_no) else {
            error!(part_no = chunk.part_no, "ran out of presigned urls");
            ledger.fail(FailureReason::MissingUrl {
                part_no: chunk.part_no,
            });
            break;
        };

        let read_now = consumed.load(Ordering::Relaxed);
        ledger.dispatched(chunk.part_no, read_now - reported);
        reported = read_now;
        progress.emit(ProgressEvent::Reading {
            bytes_read: read_now,
        });

        debug!(part_no = chunk.part_no, len = chunk.data.len(), "dispatching chunk");
        let transport = Arc::clone(&transport);
        let chunk_options = chunk_options.clone();
        let token = cancel.clone();
        let failed = Arc::clone(&failed_part);
        gate.spawn(slot, async move {
            let part_no = target.part_no;
            let result =
                upload_chunk(transport.as_ref(), &target, chunk.data, &chunk_options, &token).await;
            if result.is_none() && !token.is_cancelled() {
                let _ = failed.compare_exchange(0, part_no, Ordering::SeqCst, Ordering::SeqCst);
            }
            (part_no, result)
        });
    }

    if ledger.failure.is_none() {
        let settled = gate.join_all(cancel).await;
        let cancelled = cancel.is_cancelled();
        ledger.reap(settled, cancelled, progress);
        if cancelled && ledger.tokens.len() != ledger.dispatched as usize {
            ledger.fail(FailureReason::Cancelled);
        }
    } else {
        gate.shutdown().await;
    }

    debug!(parts = chunker.emitted(), "multipart stream finished");
    ledger.finish()
}
