//! Two-phase finish of a multipart upload: complete with the ordered tokens,
//! or abort. Neither call is retried here.

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::progress::{Progress, ProgressEvent};
use crate::transport::{PutRequest, Transport, TransportResponse};
use crate::upload::multipart::Outcome;
use crate::upload::{AbortedUpload, CompletionToken, MultipartResult, UploadSession};

#[derive(Serialize)]
struct CompleteBody<'a> {
    asset_path: &'a str,
    upload_id: &'a str,
    multipart_upload_info: &'a [CompletionToken],
}

#[derive(Serialize)]
struct AbortBody<'a> {
    asset_title: &'a str,
    upload_id: &'a str,
}

fn json_request(url: &str, body: Vec<u8>, origin: &str) -> PutRequest {
    PutRequest::new(url, Bytes::from(body))
        .header("content-type", Some("application/json"))
        .header("access-control-allow-origin", Some(origin))
}

pub(crate) async fn finalize(
    transport: &dyn Transport,
    origin: &str,
    session: &UploadSession,
    outcome: Outcome,
    progress: &Progress,
) -> Result<MultipartResult> {
    match outcome {
        Outcome::Failed(reason) => {
            error!(%reason, "upload failed, aborting multipart upload");
            let response = abort(transport, origin, session).await;
            progress.emit(ProgressEvent::Done { aborted: true });
            Ok(MultipartResult::Aborted(AbortedUpload { reason, response }))
        }
        Outcome::Done(tokens) => {
            progress.emit(ProgressEvent::Confirming);
            let completed = complete(transport, origin, session, &tokens).await?;
            progress.emit(ProgressEvent::Done { aborted: false });
            Ok(MultipartResult::Completed(completed))
        }
    }
}

#[instrument(skip_all, fields(upload_id = %session.upload_id, parts = tokens.len()))]
pub(crate) async fn complete(
    transport: &dyn Transport,
    origin: &str,
    session: &UploadSession,
    tokens: &[CompletionToken],
) -> Result<TransportResponse> {
    let body = serde_json::to_vec(&CompleteBody {
        asset_path: &session.file_path,
        upload_id: &session.upload_id,
        multipart_upload_info: tokens,
    })?;

    match transport
        .put(json_request(&session.completion_url, body, origin))
        .await
    {
        Ok(response) => {
            if response.is_success() {
                info!(status = response.status, "multipart upload completed");
            } else {
                warn!(status = response.status, "backend rejected multipart completion");
            }
            Ok(response)
        }
        Err(e) => {
            error!(error = %e, "multipart completion call failed");
            Err(e.into())
        }
    }
}

/// Best effort: failures are logged and reported as `None`.
#[instrument(skip_all, fields(upload_id = %session.upload_id))]
pub(crate) async fn abort(
    transport: &dyn Transport,
    origin: &str,
    session: &UploadSession,
) -> Option<TransportResponse> {
    let body = match serde_json::to_vec(&AbortBody {
        asset_title: &session.file_path,
        upload_id: &session.upload_id,
    }) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to encode abort request");
            return None;
        }
    };

    match transport
        .put(json_request(&session.abort_url, body, origin))
        .await
    {
        Ok(response) => {
            info!(status = response.status, "multipart upload aborted");
            Some(response)
        }
        Err(e) => {
            error!(error = %e, "multipart abort call failed");
            None
        }
    }
}
