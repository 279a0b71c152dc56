mod common;

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use chunkput::{
    BatchItem, BatchOptions, CompressionFormat, PresignRequest, ProgressEvent, RetryHooks,
    UploadSource, UploadUrls, Uploader, UploaderOptions, UrlProvider,
};
use common::{payload, shared, MockTransport};

const URL: &str = "http://storage.test/bucket/report.pdf";

#[tokio::test]
async fn single_file_recovers_from_one_timeout() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let retries = Arc::new(AtomicUsize::new(0));
    let (t, r) = (Arc::clone(&timeouts), Arc::clone(&retries));
    let hooks = RetryHooks {
        on_timeout: Some(Arc::new(move || {
            t.fetch_add(1, Ordering::SeqCst);
        })),
        on_before_retry: Some(Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })),
    };

    let transport = shared(MockTransport::new().time_out_first("report.pdf", 1));
    let uploader = Uploader::with_transport(
        transport.clone(),
        UploaderOptions::default().with_hooks(hooks),
    );

    let source = UploadSource::from_bytes("report.pdf", payload(4096)).with_content_type("application/pdf");
    let response = uploader
        .upload_with_presigned_url(source, URL)
        .await
        .unwrap()
        .expect("second attempt succeeds");

    assert_eq!(response.status, 200);
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(retries.load(Ordering::SeqCst), 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].header_value("content-type"), Some("application/pdf"));
    assert_eq!(requests[1].header_value("content-encoding"), None);
    assert_eq!(requests[1].body.len(), 4096);
}

#[tokio::test]
async fn empty_url_is_a_precondition_violation() {
    let transport = shared(MockTransport::new());
    let uploader = Uploader::with_transport(transport.clone(), UploaderOptions::default());

    let err = uploader
        .upload_with_presigned_url(UploadSource::from_bytes("a.txt", "hello"), "")
        .await
        .unwrap_err();

    assert!(err.is_precondition());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn buffered_upload_is_compressed() {
    let transport = shared(MockTransport::new());
    let uploader = Uploader::with_transport(
        transport.clone(),
        UploaderOptions::default().with_compression(Some(CompressionFormat::Gzip)),
    );
    let input = payload(100_000);

    uploader
        .buffered_file_upload(UploadSource::from_bytes("data.bin", input.clone()), URL)
        .await
        .unwrap()
        .expect("upload succeeds");

    let request = &transport.requests()[0];
    assert_eq!(request.header_value("content-encoding"), Some("gzip"));
    let mut decoded = Vec::new();
    GzDecoder::new(&request.body[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, input);
}

#[tokio::test]
async fn exhausted_single_upload_yields_none() {
    let transport = shared(MockTransport::new().fail_urls_containing("report.pdf"));
    let uploader = Uploader::with_transport(
        transport.clone(),
        UploaderOptions::default().with_retries(2),
    );

    let response = uploader
        .upload_with_presigned_url(UploadSource::from_bytes("report.pdf", "x"), URL)
        .await
        .unwrap();

    assert!(response.is_none());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn batch_reports_every_file_in_order() {
    let transport = shared(
        MockTransport::new()
            .with_delay(Duration::from_millis(5))
            .fail_urls_containing("b.json"),
    );
    let uploader = Uploader::with_transport(
        transport.clone(),
        UploaderOptions::default().with_retries(0),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let items = ["a.json", "b.json", "c.json", "d.json"]
        .iter()
        .map(|name| {
            BatchItem::new(
                UploadSource::from_bytes(*name, r#"{"v":1}"#),
                format!("http://storage.test/bucket/{name}"),
            )
        })
        .collect();
    let outcomes = uploader
        .buffered_files_upload(
            items,
            BatchOptions::default()
                .with_concurrency(2)
                .with_compression(None),
            Some(Arc::new(move |event: ProgressEvent| sink.lock().unwrap().push(event))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["a.json", "b.json", "c.json", "d.json"]);
    let succeeded: Vec<bool> = outcomes.iter().map(|o| o.response.is_some()).collect();
    assert_eq!(succeeded, [true, false, true, true]);
    assert!(transport.peak_in_flight() <= 2);
    assert!(transport
        .requests()
        .iter()
        .all(|r| r.header_value("content-encoding").is_none()));

    let events = events.lock().unwrap();
    let started = events
        .iter()
        .take(4)
        .all(|e| matches!(e, ProgressEvent::File { percent: 0, .. }));
    assert!(started);
    let finished: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::File { name, percent: 100 } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 3);
    assert!(!finished.contains(&"b.json"));
}

struct FixedProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl UrlProvider for FixedProvider {
    async fn presign(&self, request: &PresignRequest) -> chunkput::Result<UploadUrls> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UploadUrls::single(format!(
            "http://storage.test/{}/{}",
            request.bucket,
            request.object_key()
        )))
    }
}

#[tokio::test]
async fn provider_url_is_used_for_single_upload() {
    let transport = shared(MockTransport::new());
    let uploader = Uploader::with_transport(transport.clone(), UploaderOptions::default());
    let provider = FixedProvider {
        calls: AtomicUsize::new(0),
    };

    let request = PresignRequest::single("media", "clip.txt").with_folder("daily");
    uploader
        .upload_via_provider(&provider, &request, UploadSource::from_bytes("clip.txt", "hi"))
        .await
        .unwrap()
        .expect("upload succeeds");

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        transport.requests()[0].url,
        "http://storage.test/media/daily/clip.txt"
    );
}

#[tokio::test]
async fn oversized_declared_size_is_not_preallocated() {
    let transport = shared(MockTransport::new());
    let uploader = Uploader::with_transport(transport.clone(), UploaderOptions::default());
    let reader = std::io::Cursor::new(vec![1u8; 4]);
    let source = UploadSource::from_reader("stream.bin", u64::MAX, reader);

    uploader
        .upload_with_presigned_url(source, URL)
        .await
        .unwrap()
        .expect("upload succeeds");

    assert_eq!(transport.requests()[0].body.len(), 4);
}

fn slow_batch() -> Vec<BatchItem> {
    vec![BatchItem::new(
        UploadSource::from_bytes("slow.json", "{}"),
        "http://storage.test/bucket/slow.json",
    )]
}

#[tokio::test(start_paused = true)]
async fn batch_honours_disabled_timeout() {
    let transport = shared(MockTransport::new().with_delay(Duration::from_secs(120)));
    let uploader = Uploader::with_transport(
        transport.clone(),
        UploaderOptions::default()
            .with_buffered_timeout(None)
            .with_retries(0),
    );

    let outcomes = uploader
        .buffered_files_upload(slow_batch(), BatchOptions::default(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcomes[0].response.is_some());

    let outcomes = uploader
        .buffered_files_upload(
            slow_batch(),
            BatchOptions::default().with_timeout(Duration::from_secs(1)),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(outcomes[0].response.is_none());
}
