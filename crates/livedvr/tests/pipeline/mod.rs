use std::{num::NonZeroU32, time::Duration};

use livedvr::{
    fetch::{SegmentBlob, SegmentFetcher},
    manifest::Manifest,
    mux::{DemuxedTrack, Demuxer, MuxSink, Packet, StreamMuxer, TimeBase, TimedPacket},
    pipeline::{DownloadPlan, Pipeline, StreamSelection},
    range::{SegmentRange, WindowRequest},
    retry::RetryPolicy,
    DvrError, DvrResult, HttpClient, MediaKind,
};
use wiremock::MockServer;

use crate::{init_test_tracing, live_manifest, DvrMock};

/// A segment payload is `|<index>|`. Each segment demuxes into a seam packet
/// without timestamp and two 1 second packets starting over at zero.
struct SegmentDemuxer;

impl Demuxer for SegmentDemuxer {
    type Params = MediaKind;
    type Payload = u64;

    fn demux(&self, blob: &SegmentBlob) -> DvrResult<DemuxedTrack<MediaKind, u64>> {
        let kind = blob.media_kind();
        let text = String::from_utf8_lossy(blob.as_bytes()).into_owned();
        let mut packets = Vec::new();
        for index in text.split('|').filter_map(|s| s.parse::<u64>().ok()) {
            packets.push(Packet {
                decode_timestamp: None,
                duration: 0,
                payload: index,
                stream_affinity: kind,
            });
            for offset in 0..2 {
                packets.push(Packet {
                    decode_timestamp: Some(offset * 1000),
                    duration: 1000,
                    payload: index,
                    stream_affinity: kind,
                });
            }
        }
        Ok(DemuxedTrack {
            params: kind,
            time_base: TimeBase::MILLISECONDS,
            packets,
        })
    }
}

#[derive(Default)]
struct MemorySink {
    tracks: Vec<MediaKind>,
    packets: Vec<(usize, TimedPacket<u64>)>,
    finished: bool,
}

impl MemorySink {
    fn track(&self, kind: MediaKind) -> Vec<&TimedPacket<u64>> {
        let id = self.tracks.iter().position(|k| *k == kind);
        self.packets
            .iter()
            .filter(|(track, _)| Some(*track) == id)
            .map(|(_, p)| p)
            .collect()
    }
}

impl MuxSink<MediaKind, u64> for MemorySink {
    fn add_track(&mut self, kind: MediaKind, _: &MediaKind, _: TimeBase) -> DvrResult<usize> {
        self.tracks.push(kind);
        Ok(self.tracks.len() - 1)
    }

    fn write_header(&mut self) -> DvrResult<()> {
        Ok(())
    }

    fn write_packet(&mut self, track: usize, packet: TimedPacket<u64>) -> DvrResult<()> {
        self.packets.push((track, packet));
        Ok(())
    }

    fn finish(&mut self) -> DvrResult<()> {
        self.finished = true;
        Ok(())
    }
}

async fn setup_stream(range: SegmentRange) -> MockServer {
    let server = MockServer::start().await;
    server.mock("/manifest", live_manifest(&server.uri())).await;
    for index in range.iter() {
        for stream in ["audio", "video720", "video1080"] {
            server
                .mock(&format!("/{stream}/sq/{index}"), format!("|{index}|"))
                .await;
        }
    }
    server
}

#[tokio::test]
async fn test_download_window_end_to_end() -> anyhow::Result<()> {
    init_test_tracing();
    let expected_range = SegmentRange {
        start_index: 940,
        end_index_exclusive: 960,
    };
    let server = setup_stream(expected_range).await;

    let client = HttpClient::default();
    let text = client.get_text(format!("{}/manifest", server.uri())).await?;
    let manifest = Manifest::parse(&text)?;
    assert_eq!(manifest.timing.latest_available_segment_index, 1000);
    assert_eq!(manifest.video[0].quality_label, "1920x1080");

    let request = WindowRequest {
        start: Some("2024-01-01T11:58:00Z".to_string()),
        duration: Some("40s".to_string()),
        utc: true,
        ..Default::default()
    };
    let plan = DownloadPlan::new(&manifest, StreamSelection::default(), &request)?;
    assert_eq!(plan.range, expected_range);

    let fetcher = SegmentFetcher::new(client)
        .retry(RetryPolicy::bounded(NonZeroU32::MIN, Duration::from_millis(10)));
    let pipeline = Pipeline::new(fetcher);
    let sink = pipeline
        .run(&plan, |audio, video| {
            let mut sink = MemorySink::default();
            StreamMuxer::new(SegmentDemuxer).mux(&mut sink, &audio, &video)?;
            Ok(sink)
        })
        .await?;

    assert!(sink.finished);
    for kind in [MediaKind::Audio, MediaKind::Video] {
        let packets = sink.track(kind);
        // two timed packets per segment, seams dropped
        assert_eq!(packets.len(), 40);
        assert_eq!(packets[0].timestamp, 0);
        for pair in packets.windows(2) {
            assert_eq!(pair[1].timestamp, pair[0].timestamp + pair[0].duration);
        }
        let last = packets[packets.len() - 1];
        assert_eq!(last.timestamp + last.duration, 40_000);
        // segments stay in index order
        assert!(packets.windows(2).all(|p| p[0].payload <= p[1].payload));
        assert_eq!(packets[0].payload, 940);
        assert_eq!(last.payload, 959);
    }
    Ok(())
}

#[tokio::test]
async fn test_future_window_fetches_nothing() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    server.mock("/manifest", live_manifest(&server.uri())).await;

    let text = HttpClient::default()
        .get_text(format!("{}/manifest", server.uri()))
        .await?;
    let manifest = Manifest::parse(&text)?;

    let request = WindowRequest {
        start: Some("2024-01-01T12:00:00Z".to_string()),
        duration: Some("4s".to_string()),
        utc: true,
        ..Default::default()
    };
    let result = DownloadPlan::new(&manifest, StreamSelection::default(), &request);
    assert!(matches!(
        result,
        Err(DvrError::RangeNotYetAvailable {
            requested: 1002,
            available: 1001
        })
    ));

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    Ok(())
}
