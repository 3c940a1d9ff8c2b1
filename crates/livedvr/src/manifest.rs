//! Live manifest model.
//!
//! Only the subset of a live MPD needed to cut a window out of the broadcast is
//! extracted: one [`StreamDescriptor`] per `Representation` and the live timing
//! facts published as attributes on the root element.
//!
//! ```xml
//! <MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:yt="http://youtube.com/yt/2012/10/10"
//!      minimumUpdatePeriod="PT2.000S"
//!      yt:earliestMediaSequence="100"
//!      yt:mpdResponseTime="2024-01-01T12:00:00.000">
//!   <Period>
//!     <SegmentList><SegmentTimeline><S d="2000"/>...</SegmentTimeline></SegmentList>
//!     <AdaptationSet mimeType="audio/mp4">
//!       <Representation bandwidth="144000" codecs="mp4a.40.2" audioSamplingRate="48000">
//!         <BaseURL>https://example.com/audio/</BaseURL>
//!       </Representation>
//!     </AdaptationSet>
//!   </Period>
//! </MPD>
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{DvrError, DvrResult, MediaKind};

/// One bitrate/codec/quality variant of a single media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub media_kind: MediaKind,
    pub bitrate_bps: u64,
    pub codec_id: String,
    pub quality_label: String,
    /// Prefix the segment index is appended to.
    pub segment_base_url: String,
}

impl StreamDescriptor {
    pub fn segment_url(&self, index: u64) -> String {
        format!("{}{index}", self.segment_base_url)
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>9} Bitrate: {:>8} Codec: {}",
            self.quality_label, self.bitrate_bps, self.codec_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifestTimingInfo {
    pub response_timestamp: DateTime<Utc>,
    pub segment_duration_seconds: u64,
    pub latest_available_segment_index: u64,
}

impl ManifestTimingInfo {
    /// Length of the rewindable window at response time.
    pub fn available_window(&self) -> TimeDelta {
        self.checked_window().unwrap_or(TimeDelta::MAX)
    }

    /// The earliest instant that still has a segment available.
    pub fn earliest_available(&self) -> DateTime<Utc> {
        self.checked_earliest().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn checked_window(&self) -> Option<TimeDelta> {
        let seconds = self
            .latest_available_segment_index
            .checked_mul(self.segment_duration_seconds)?;
        TimeDelta::try_seconds(i64::try_from(seconds).ok()?)
    }

    fn checked_earliest(&self) -> Option<DateTime<Utc>> {
        self.response_timestamp
            .checked_sub_signed(self.checked_window()?)
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    /// Sorted by descending bitrate.
    pub audio: Vec<StreamDescriptor>,
    /// Sorted by descending bitrate.
    pub video: Vec<StreamDescriptor>,
    pub timing: ManifestTimingInfo,
}

#[derive(Default)]
struct RootAttributes {
    response_time: Option<String>,
    earliest_sequence: Option<String>,
    update_period: Option<String>,
}

struct PendingRepresentation {
    media_kind: Option<MediaKind>,
    bitrate_bps: Option<u64>,
    codec_id: Option<String>,
    quality_label: Option<String>,
    base_url: Option<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> DvrResult<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut root: Option<RootAttributes> = None;
        let mut depth = 0usize;

        let mut adaptation_kind: Option<MediaKind> = None;
        let mut representation: Option<PendingRepresentation> = None;
        let mut in_base_url = false;

        let mut timeline_seen = false;
        let mut in_first_timeline = false;
        let mut segment_entries = 0u64;

        let mut audio = Vec::new();
        let mut video = Vec::new();

        loop {
            let event = reader.read_event()?;
            let is_empty = matches!(event, Event::Empty(_));
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if !is_empty {
                        depth += 1;
                    }
                    match e.local_name().as_ref() {
                        b"MPD" if root.is_none() => {
                            root = Some(read_root_attributes(e)?);
                        }
                        b"AdaptationSet" => {
                            adaptation_kind = attribute(e, b"mimeType")?
                                .as_deref()
                                .and_then(MediaKind::from_mime_type);
                        }
                        b"Representation" => {
                            let pending = read_representation(e, adaptation_kind)?;
                            if is_empty {
                                push_descriptor(pending, &mut audio, &mut video)?;
                            } else {
                                representation = Some(pending);
                            }
                        }
                        b"BaseURL" if representation.is_some() && !is_empty => {
                            in_base_url = true;
                        }
                        b"SegmentTimeline" if !timeline_seen => {
                            timeline_seen = true;
                            in_first_timeline = !is_empty;
                        }
                        b"S" if in_first_timeline => segment_entries += 1,
                        _ => {}
                    }
                }
                Event::Text(t) if in_base_url => {
                    let text = t.unescape()?;
                    if let Some(representation) = representation.as_mut() {
                        let base_url = representation.base_url.get_or_insert_with(String::new);
                        base_url.push_str(text.trim());
                    }
                }
                Event::CData(t) if in_base_url => {
                    if let Some(representation) = representation.as_mut() {
                        let text = String::from_utf8_lossy(&t);
                        let base_url = representation.base_url.get_or_insert_with(String::new);
                        base_url.push_str(text.trim());
                    }
                }
                Event::End(ref e) => {
                    depth = depth.saturating_sub(1);
                    match e.local_name().as_ref() {
                        b"BaseURL" => in_base_url = false,
                        b"SegmentTimeline" => in_first_timeline = false,
                        b"AdaptationSet" => adaptation_kind = None,
                        b"Representation" => {
                            if let Some(pending) = representation.take() {
                                push_descriptor(pending, &mut audio, &mut video)?;
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(DvrError::ManifestParse(
                "document ended before all elements were closed".to_string(),
            ));
        }
        let root = root.ok_or_else(|| DvrError::ManifestParse("missing MPD element".into()))?;

        let timing = ManifestTimingInfo {
            response_timestamp: parse_response_time(required(
                root.response_time,
                "yt:mpdResponseTime",
            )?)?,
            segment_duration_seconds: parse_update_period(required(
                root.update_period,
                "minimumUpdatePeriod",
            )?)?,
            latest_available_segment_index: latest_segment_index(
                required(root.earliest_sequence, "yt:earliestMediaSequence")?,
                segment_entries,
            )?,
        };
        if timing.checked_earliest().is_none() {
            return Err(DvrError::ManifestParse(format!(
                "{} segments of {}s reach before any representable time",
                timing.latest_available_segment_index, timing.segment_duration_seconds
            )));
        }

        if audio.is_empty() {
            return Err(DvrError::ManifestParse("no audio representation".into()));
        }
        if video.is_empty() {
            return Err(DvrError::ManifestParse("no video representation".into()));
        }

        // stable: equal bitrates keep document order
        audio.sort_by(|a, b| b.bitrate_bps.cmp(&a.bitrate_bps));
        video.sort_by(|a, b| b.bitrate_bps.cmp(&a.bitrate_bps));

        tracing::debug!(
            audio = audio.len(),
            video = video.len(),
            latest = timing.latest_available_segment_index,
            segment_duration = timing.segment_duration_seconds,
            "Parsed live manifest"
        );

        Ok(Self {
            audio,
            video,
            timing,
        })
    }

    pub fn descriptors(&self, kind: MediaKind) -> &[StreamDescriptor] {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

fn attribute(e: &BytesStart, local_name: &[u8]) -> DvrResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| DvrError::ManifestParse(e.to_string()))?;
        if attr.key.local_name().as_ref() == local_name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn read_root_attributes(e: &BytesStart) -> DvrResult<RootAttributes> {
    Ok(RootAttributes {
        response_time: attribute(e, b"mpdResponseTime")?,
        earliest_sequence: attribute(e, b"earliestMediaSequence")?,
        update_period: attribute(e, b"minimumUpdatePeriod")?,
    })
}

fn read_representation(
    e: &BytesStart,
    adaptation_kind: Option<MediaKind>,
) -> DvrResult<PendingRepresentation> {
    let media_kind = adaptation_kind.or(attribute(e, b"mimeType")?
        .as_deref()
        .and_then(MediaKind::from_mime_type));
    let bitrate_bps = attribute(e, b"bandwidth")?
        .map(|b| {
            b.parse::<u64>()
                .map_err(|_| DvrError::ManifestParse(format!("invalid bandwidth: {b}")))
        })
        .transpose()?;
    let quality_label = match media_kind {
        Some(MediaKind::Video) => match (attribute(e, b"width")?, attribute(e, b"height")?) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        },
        Some(MediaKind::Audio) => attribute(e, b"audioSamplingRate")?,
        None => None,
    };

    Ok(PendingRepresentation {
        media_kind,
        bitrate_bps,
        codec_id: attribute(e, b"codecs")?,
        quality_label,
        base_url: None,
    })
}

fn push_descriptor(
    pending: PendingRepresentation,
    audio: &mut Vec<StreamDescriptor>,
    video: &mut Vec<StreamDescriptor>,
) -> DvrResult<()> {
    let Some(media_kind) = pending.media_kind else {
        // text tracks and other kinds are not part of the output
        return Ok(());
    };
    let missing = |what: &str| DvrError::ManifestParse(format!("{media_kind} representation without {what}"));

    let descriptor = StreamDescriptor {
        media_kind,
        bitrate_bps: pending.bitrate_bps.ok_or_else(|| missing("bandwidth"))?,
        codec_id: pending.codec_id.ok_or_else(|| missing("codecs"))?,
        quality_label: pending.quality_label.ok_or_else(|| missing("quality"))?,
        segment_base_url: format!("{}sq/", pending.base_url.ok_or_else(|| missing("BaseURL"))?),
    };
    match media_kind {
        MediaKind::Audio => audio.push(descriptor),
        MediaKind::Video => video.push(descriptor),
    }
    Ok(())
}

fn required(value: Option<String>, name: &str) -> DvrResult<String> {
    value.ok_or_else(|| DvrError::ManifestParse(format!("missing attribute {name}")))
}

fn latest_segment_index(earliest_sequence: String, entries: u64) -> DvrResult<u64> {
    let earliest = earliest_sequence.trim().parse::<u64>().map_err(|_| {
        DvrError::ManifestParse(format!("invalid earliest sequence: {earliest_sequence}"))
    })?;
    earliest
        .checked_add(entries)
        .ok_or_else(|| {
            DvrError::ManifestParse(format!("earliest sequence too large: {earliest}"))
        })?
        .checked_sub(1)
        .ok_or_else(|| DvrError::ManifestParse("manifest lists no segments".to_string()))
}

/// `yt:mpdResponseTime` is a naive UTC timestamp, usually with milliseconds.
pub(crate) fn parse_response_time(value: String) -> DvrResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.with_timezone(&Utc));
    }
    let naive = value.strip_suffix('Z').unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|datetime| datetime.and_utc())
        .map_err(|_| DvrError::ManifestParse(format!("invalid response time: {value}")))
}

/// Whole seconds of an ISO-8601 duration such as `PT2.000S` or `PT1M30S`.
///
/// The fractional part of the seconds component is dropped.
pub(crate) fn parse_update_period(value: String) -> DvrResult<u64> {
    let invalid = || DvrError::ManifestParse(format!("invalid minimumUpdatePeriod: {value}"));

    let rest = value.trim().strip_prefix("PT").ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut seconds = 0u64;
    let mut number = String::new();
    for c in rest.chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'H' | 'M' | 'S' => {
                let whole = number.split('.').next().unwrap_or_default();
                let amount = whole.parse::<u64>().map_err(|_| invalid())?;
                if c != 'S' && number.contains('.') {
                    return Err(invalid());
                }
                let unit = match c {
                    'H' => 3600,
                    'M' => 60,
                    _ => 1,
                };
                seconds = amount
                    .checked_mul(unit)
                    .and_then(|s| s.checked_add(seconds))
                    .ok_or_else(invalid)?;
                number.clear();
            }
            _ => return Err(invalid()),
        }
    }
    if !number.is_empty() || seconds == 0 {
        return Err(invalid());
    }

    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(earliest: u64, entries: usize) -> String {
        let timeline: String = (0..entries).map(|_| r#"<S d="2000"/>"#).collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:yt="http://youtube.com/yt/2012/10/10"
     type="dynamic" minimumUpdatePeriod="PT2.000S"
     yt:earliestMediaSequence="{earliest}" yt:mpdResponseTime="2024-01-01T12:00:00.000">
  <Period start="PT0S">
    <SegmentList><SegmentTimeline>{timeline}</SegmentTimeline></SegmentList>
    <AdaptationSet mimeType="audio/mp4" subsegmentAlignment="true">
      <Representation id="140" codecs="mp4a.40.2" audioSamplingRate="48000" bandwidth="144000">
        <BaseURL>https://example.com/videoplayback/itag/140/</BaseURL>
      </Representation>
      <Representation id="139" codecs="mp4a.40.5" audioSamplingRate="22050" bandwidth="48000">
        <BaseURL>https://example.com/videoplayback/itag/139/</BaseURL>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="video/mp4" subsegmentAlignment="true">
      <Representation id="133" codecs="avc1.4d4015" width="426" height="240" bandwidth="300000">
        <BaseURL>https://example.com/videoplayback/itag/133/</BaseURL>
      </Representation>
      <Representation id="137" codecs="avc1.640028" width="1920" height="1080" bandwidth="4500000">
        <BaseURL>https://example.com/videoplayback/itag/137/</BaseURL>
      </Representation>
      <Representation id="136" codecs="avc1.4d401f" width="1280" height="720" bandwidth="300000">
        <BaseURL>https://example.com/videoplayback/itag/136/</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#
        )
    }

    #[test]
    fn test_latest_available_segment_index() {
        let manifest = Manifest::parse(&manifest(100, 50)).unwrap();
        assert_eq!(manifest.timing.latest_available_segment_index, 149);
        assert_eq!(manifest.timing.segment_duration_seconds, 2);
        assert_eq!(
            manifest.timing.response_timestamp,
            "2024-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_descriptors_sorted_by_bitrate() {
        let manifest = Manifest::parse(&manifest(0, 3)).unwrap();

        for list in [&manifest.audio, &manifest.video] {
            assert!(list
                .windows(2)
                .all(|pair| pair[0].bitrate_bps >= pair[1].bitrate_bps));
        }

        let labels: Vec<_> = manifest.video.iter().map(|v| v.quality_label.as_str()).collect();
        // 240p and 720p share a bitrate and keep document order
        assert_eq!(labels, ["1920x1080", "426x240", "1280x720"]);
        assert_eq!(manifest.audio[0].quality_label, "48000");
        assert_eq!(
            manifest.audio[0].segment_url(7),
            "https://example.com/videoplayback/itag/140/sq/7"
        );
    }

    #[test]
    fn test_missing_live_attributes() {
        let text = manifest(0, 3).replace("yt:earliestMediaSequence=\"0\"", "");
        assert!(matches!(
            Manifest::parse(&text),
            Err(DvrError::ManifestParse(_))
        ));

        let text = manifest(0, 3).replace("minimumUpdatePeriod=\"PT2.000S\"", "");
        assert!(matches!(
            Manifest::parse(&text),
            Err(DvrError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_missing_media_kind() {
        let text = manifest(0, 3).replace("audio/mp4", "text/vtt");
        assert!(matches!(
            Manifest::parse(&text),
            Err(DvrError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_malformed_document() {
        let text = manifest(0, 3);
        let truncated = &text[..text.len() - "</MPD>".len()];
        assert!(Manifest::parse(truncated).is_err());
        assert!(Manifest::parse("<MPD><Period></MPD>").is_err());
    }

    #[test]
    fn test_oversized_sequence_numbers() {
        let text = manifest(u64::MAX, 3);
        assert!(matches!(
            Manifest::parse(&text),
            Err(DvrError::ManifestParse(_))
        ));

        // a window reaching back before the earliest representable date
        let text = manifest(1_000_000_000_000_000, 3);
        assert!(matches!(
            Manifest::parse(&text),
            Err(DvrError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_timing_saturates() {
        let timing = ManifestTimingInfo {
            response_timestamp: "2024-01-01T12:00:00Z".parse().unwrap(),
            segment_duration_seconds: u64::MAX,
            latest_available_segment_index: 2,
        };
        assert_eq!(timing.available_window(), TimeDelta::MAX);
        assert_eq!(timing.earliest_available(), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_parse_update_period() {
        assert_eq!(parse_update_period("PT2.000S".into()).unwrap(), 2);
        assert_eq!(parse_update_period("PT5.999S".into()).unwrap(), 5);
        assert_eq!(parse_update_period("PT1M30S".into()).unwrap(), 90);
        assert!(parse_update_period("PT0.500S".into()).is_err());
        assert!(parse_update_period("P1D".into()).is_err());
        assert!(parse_update_period("PT".into()).is_err());
        assert!(parse_update_period("PT6000000000000000H".into()).is_err());
    }

    #[test]
    fn test_parse_response_time() {
        let expected = "2024-01-01T12:00:00.250Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            parse_response_time("2024-01-01T12:00:00.250".into()).unwrap(),
            expected
        );
        assert_eq!(
            parse_response_time("2024-01-01T12:00:00.250Z".into()).unwrap(),
            expected
        );
        assert!(parse_response_time("yesterday".into()).is_err());
    }
}
