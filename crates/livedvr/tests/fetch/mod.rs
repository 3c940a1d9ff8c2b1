use std::{num::NonZeroU32, time::Duration};

use livedvr::{
    fetch::SegmentFetcher, manifest::StreamDescriptor, range::SegmentRange, retry::RetryPolicy,
    DvrError, HttpClient, MediaKind,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{init_test_tracing, AssertWrapper, DvrMock};

fn descriptor(server: &MockServer) -> StreamDescriptor {
    StreamDescriptor {
        media_kind: MediaKind::Video,
        bitrate_bps: 1_000_000,
        codec_id: "avc1.4d401f".to_string(),
        quality_label: "1280x720".to_string(),
        segment_base_url: format!("{}/video/sq/", server.uri()),
    }
}

fn fast_retry(max_attempts: Option<u32>) -> RetryPolicy {
    let delay = Duration::from_millis(10);
    match max_attempts.and_then(NonZeroU32::new) {
        Some(attempts) => RetryPolicy::bounded(attempts, delay),
        None => RetryPolicy::indefinite(delay),
    }
}

#[tokio::test]
async fn test_segment_succeeds_on_third_attempt() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/sq/7"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    server.mock("/video/sq/7", "payload-7").await;

    let fetcher = SegmentFetcher::new(HttpClient::default()).retry(fast_retry(None));
    let range = SegmentRange {
        start_index: 7,
        end_index_exclusive: 8,
    };
    let blob = fetcher.fetch(&descriptor(&server), range).await?;

    assert_eq!(blob.as_bytes(), b"payload-7");
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_bounded_retry_gives_up() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/sq/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = SegmentFetcher::new(HttpClient::default()).retry(fast_retry(Some(2)));
    let range = SegmentRange {
        start_index: 3,
        end_index_exclusive: 4,
    };
    let result = fetcher.fetch(&descriptor(&server), range).await;

    assert!(matches!(
        result,
        Err(DvrError::SegmentFetch {
            index: 3,
            attempts: 2,
            ..
        })
    ));
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_blob_is_in_index_order() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    // earlier segments answer later
    for index in 20..28u64 {
        Mock::given(method("GET"))
            .and(path(format!("/video/sq/{index}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<{index}>"))
                    .set_delay(Duration::from_millis((28 - index) * 15)),
            )
            .mount(&server)
            .await;
    }

    let fetcher = SegmentFetcher::new(HttpClient::default())
        .concurrency(NonZeroU32::new(4).unwrap())
        .retry(fast_retry(Some(1)));
    let range = SegmentRange {
        start_index: 20,
        end_index_exclusive: 28,
    };
    let blob = fetcher.fetch(&descriptor(&server), range).await.assert_success();

    let expected: String = (20..28).map(|i| format!("<{i}>")).collect();
    assert_eq!(blob.as_bytes(), expected.as_bytes());
    assert_eq!(blob.range(), range);
    assert_eq!(fetcher.progress().completed(), 8);
    Ok(())
}
