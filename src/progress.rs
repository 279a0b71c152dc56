use std::sync::Arc;

use serde::Serialize;

/// A progress notification, tagged by the phase it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Raw source bytes consumed so far, emitted at every chunk boundary.
    Reading { bytes_read: u64 },
    /// A chunk settled. `increment` is this chunk's share of the file in
    /// percent (rounded up); `percent` is the running total, capped at 100.
    Uploading { part_no: u32, increment: u8, percent: u8 },
    Confirming,
    Done { aborted: bool },
    /// Per-file progress on the batch path.
    File { name: String, percent: u8 },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// `part` as a percentage of `total`, rounded up and capped at 100.
pub fn percent_of(part: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (part.saturating_mul(100)).div_ceil(total);
    percent.min(100) as u8
}

/// Per-call progress state. Never rolls back.
pub(crate) struct Progress {
    callback: Option<ProgressCallback>,
    total_bytes: u64,
    percent: u8,
}

impl Progress {
    pub(crate) fn new(callback: Option<ProgressCallback>, total_bytes: u64) -> Self {
        Self {
            callback,
            total_bytes,
            percent: 0,
        }
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub(crate) fn started(&self) {
        self.emit(ProgressEvent::Uploading {
            part_no: 0,
            increment: 0,
            percent: 0,
        });
    }

    pub(crate) fn chunk_uploaded(&mut self, part_no: u32, source_bytes: u64) {
        let increment = percent_of(source_bytes, self.total_bytes);
        self.percent = self.percent.saturating_add(increment).min(100);
        self.emit(ProgressEvent::Uploading {
            part_no,
            increment,
            percent: self.percent,
        });
    }

    pub(crate) fn percent(&self) -> u8 {
        self.percent
    }
}
