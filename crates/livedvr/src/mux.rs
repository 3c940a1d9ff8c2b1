//! Rebuilds one continuous timeline out of concatenated segments.
//!
//! Every segment of a live stream is an independent container fragment whose
//! clock starts near zero, so the timestamps of a [SegmentBlob] jump back at each
//! segment boundary. Instead of repairing those timestamps they are thrown away:
//! every packet that carries a decode timestamp gets a new one equal to the sum
//! of the durations of the packets before it.
//!
//! ```text
//! input dts:   0  1000 2000 | -  0  1000 2000 | -  0  1000
//! output dts:  0  1000 2000      3000 4000 5000    6000 7000
//! ```
//!
//! Container work itself (reading packets, writing the output file) is done by
//! a [Demuxer] and a [MuxSink]. With the `ffmpeg` feature enabled, [ffmpeg]
//! provides both on top of FFmpeg.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::cmp::Ordering;

use crate::{fetch::SegmentBlob, DvrError, DvrResult, MediaKind};

/// A demuxed packet. `payload` is whatever the backend needs to write it back.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<T> {
    /// `None` for look-ahead and padding packets around fragment boundaries.
    pub decode_timestamp: Option<i64>,
    pub duration: i64,
    pub payload: T,
    pub stream_affinity: MediaKind,
}

/// A packet on the rebuilt timeline. Decode and presentation timestamps are
/// both `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedPacket<T> {
    pub timestamp: i64,
    pub duration: i64,
    pub payload: T,
    pub stream_affinity: MediaKind,
}

/// Rational unit of packet timestamps and durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const MILLISECONDS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.num as f64 / self.den as f64
    }

    /// Compares `a` in this time base with `b` in `other` without rounding.
    fn cmp_ts(&self, a: i64, other: &TimeBase, b: i64) -> Ordering {
        let lhs = a as i128 * self.num as i128 * other.den as i128;
        let rhs = b as i128 * other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

/// Drops packets without a decode timestamp and renumbers the rest, starting at
/// zero and advancing by each packet's duration.
pub fn retime<T, I>(packets: I) -> Vec<TimedPacket<T>>
where
    I: IntoIterator<Item = Packet<T>>,
{
    packets
        .into_iter()
        .filter(|packet| packet.decode_timestamp.is_some())
        .scan(0i64, |clock, packet| {
            let timestamp = *clock;
            *clock += packet.duration;
            Some(TimedPacket {
                timestamp,
                duration: packet.duration,
                payload: packet.payload,
                stream_affinity: packet.stream_affinity,
            })
        })
        .collect()
}

/// One elementary stream read back from a blob.
pub struct DemuxedTrack<P, T> {
    /// Codec parameters used as the template for the output track.
    pub params: P,
    pub time_base: TimeBase,
    pub packets: Vec<Packet<T>>,
}

pub trait Demuxer {
    type Params;
    type Payload;

    /// Reads the first stream of the blob's media kind.
    fn demux(&self, blob: &SegmentBlob) -> DvrResult<DemuxedTrack<Self::Params, Self::Payload>>;
}

pub trait MuxSink<P, T> {
    /// Adds an output track copying `params`. Returns the track id used by
    /// [MuxSink::write_packet].
    fn add_track(&mut self, kind: MediaKind, params: &P, time_base: TimeBase) -> DvrResult<usize>;

    fn write_header(&mut self) -> DvrResult<()>;

    /// `packet` is expressed in the time base given to [MuxSink::add_track].
    fn write_packet(&mut self, track: usize, packet: TimedPacket<T>) -> DvrResult<()>;

    fn finish(&mut self) -> DvrResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    pub packets: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxSummary {
    pub audio: TrackSummary,
    pub video: TrackSummary,
}

struct RetimedTrack<P, T> {
    kind: MediaKind,
    params: P,
    time_base: TimeBase,
    packets: Vec<TimedPacket<T>>,
}

impl<P, T> RetimedTrack<P, T> {
    fn summary(&self) -> TrackSummary {
        let end = self
            .packets
            .last()
            .map(|p| p.timestamp + p.duration)
            .unwrap_or_default();
        TrackSummary {
            packets: self.packets.len(),
            duration_seconds: self.time_base.to_seconds(end),
        }
    }
}

pub struct StreamMuxer<D> {
    demuxer: D,
}

impl<D> StreamMuxer<D>
where
    D: Demuxer,
{
    pub fn new(demuxer: D) -> Self {
        Self { demuxer }
    }

    /// Writes `audio` and `video` into `sink` on a continuous timeline.
    ///
    /// Both blobs are demuxed and checked before anything reaches the sink, so an
    /// [DvrError::EmptyStream] leaves the sink untouched.
    pub fn mux<S>(
        &self,
        sink: &mut S,
        audio: &SegmentBlob,
        video: &SegmentBlob,
    ) -> DvrResult<MuxSummary>
    where
        S: MuxSink<D::Params, D::Payload>,
    {
        let video = self.retime_blob(video, MediaKind::Video)?;
        let audio = self.retime_blob(audio, MediaKind::Audio)?;

        let video_track = sink.add_track(video.kind, &video.params, video.time_base)?;
        let audio_track = sink.add_track(audio.kind, &audio.params, audio.time_base)?;
        sink.write_header()?;

        let summary = MuxSummary {
            audio: audio.summary(),
            video: video.summary(),
        };

        let mut video_packets = video.packets.into_iter().peekable();
        let mut audio_packets = audio.packets.into_iter().peekable();
        loop {
            // interleave by time, video first on ties
            let take_video = match (video_packets.peek(), audio_packets.peek()) {
                (Some(v), Some(a)) => {
                    video.time_base.cmp_ts(v.timestamp, &audio.time_base, a.timestamp)
                        != Ordering::Greater
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_video {
                if let Some(packet) = video_packets.next() {
                    sink.write_packet(video_track, packet)?;
                }
            } else if let Some(packet) = audio_packets.next() {
                sink.write_packet(audio_track, packet)?;
            }
        }

        sink.finish()?;
        tracing::info!(
            video_packets = summary.video.packets,
            audio_packets = summary.audio.packets,
            "Muxed {:.2}s of video and {:.2}s of audio.",
            summary.video.duration_seconds,
            summary.audio.duration_seconds
        );
        Ok(summary)
    }

    fn retime_blob(
        &self,
        blob: &SegmentBlob,
        kind: MediaKind,
    ) -> DvrResult<RetimedTrack<D::Params, D::Payload>> {
        let track = self.demuxer.demux(blob)?;
        let total = track.packets.len();
        let packets = retime(track.packets);
        tracing::debug!(
            "Dropped {} of {total} {kind} packets without timestamp.",
            total - packets.len()
        );
        if packets.is_empty() {
            return Err(DvrError::EmptyStream(kind));
        }

        Ok(RetimedTrack {
            kind,
            params: track.params,
            time_base: track.time_base,
            packets,
        })
    }
}
