use std::{
    ffi::CString,
    io::Write,
    path::{Path, PathBuf},
    sync::Once,
};

use rsmpeg::{
    avcodec::{AVCodecParameters, AVPacket},
    avformat::{AVFormatContextInput, AVFormatContextOutput},
    avutil::ra,
    ffi::{
        av_log_format_line2, av_log_set_callback, AVRational, AV_LOG_ERROR, AV_LOG_INFO,
        AV_LOG_WARNING,
    },
    UnsafeDerefMut,
};

use super::{DemuxedTrack, Demuxer, MuxSink, MuxSummary, Packet, StreamMuxer, TimeBase, TimedPacket};
use crate::{fetch::SegmentBlob, DvrError, DvrResult, MediaKind};

/// `AV_NOPTS_VALUE`
const NO_TIMESTAMP: i64 = i64::MIN;

// Reference: https://github.com/YeautyYE/ez-ffmpeg/blob/a249e8ad35196cdf345e3f3dc93c87cfb263bfef/src/core/mod.rs#L434-L463
#[cfg(any(
    all(
        not(target_arch = "aarch64"),
        not(target_arch = "powerpc"),
        not(target_arch = "s390x"),
        not(target_arch = "x86_64")
    ),
    all(target_arch = "aarch64", target_vendor = "apple"),
    target_family = "wasm",
    target_os = "uefi",
    windows,
))]
type VaListType = *mut ::std::os::raw::c_char;

#[cfg(all(target_arch = "x86_64", not(target_os = "uefi"), not(windows)))]
type VaListType = *mut rsmpeg::ffi::__va_list_tag;

#[cfg(all(
    target_arch = "aarch64",
    not(target_vendor = "apple"),
    not(target_os = "uefi"),
    not(windows),
))]
type VaListType = *mut rsmpeg::ffi::__va_list_tag_aarch64;

#[cfg(all(target_arch = "powerpc", not(target_os = "uefi"), not(windows)))]
type VaListType = *mut rsmpeg::ffi::__va_list_tag_powerpc;

#[cfg(target_arch = "s390x")]
type VaListType = *mut rsmpeg::ffi::__va_list_tag_s390x;

unsafe extern "C" fn ffmpeg_log_callback(
    ptr: *mut ::std::os::raw::c_void,
    level: ::std::os::raw::c_int,
    fmt: *const ::std::os::raw::c_char,
    vargs: VaListType,
) {
    if level > AV_LOG_INFO as i32 {
        return;
    }

    let mut buf = [0 as ::std::os::raw::c_char; 1024];
    let mut print_prefix = 1;

    let buf_len = av_log_format_line2(
        ptr,
        level,
        fmt,
        vargs,
        buf.as_mut_ptr(),
        buf.len() as i32,
        &mut print_prefix,
    );
    if buf_len < 0 {
        tracing::error!("ffmpeg log callback error: {}", buf_len);
        return;
    }

    let len = (buf_len as usize).min(buf.len() - 1);
    let data = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
    let data = String::from_utf8_lossy(data);
    let data = data.trim_end_matches(['\r', '\n', ' ']);
    if data.is_empty() {
        return;
    }

    let level = level as u32;
    if level <= AV_LOG_ERROR {
        tracing::error!(target: "ffmpeg", "{data}");
    } else if level <= AV_LOG_WARNING {
        tracing::warn!(target: "ffmpeg", "{data}");
    } else {
        tracing::debug!(target: "ffmpeg", "{data}");
    }
}

/// Routes FFmpeg's own logging through `tracing`.
pub fn install_log_callback() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| unsafe {
        av_log_set_callback(Some(ffmpeg_log_callback));
    });
}

fn to_time_base(rational: AVRational) -> TimeBase {
    TimeBase::new(rational.num, rational.den)
}

fn path_to_cstring(path: &Path) -> DvrResult<CString> {
    Ok(CString::new(path.as_os_str().as_encoded_bytes())?)
}

/// Reads blobs by spilling them into a temporary file and opening it with
/// libavformat, which probes the fragment format by itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegDemuxer;

impl Demuxer for FfmpegDemuxer {
    type Params = AVCodecParameters;
    type Payload = AVPacket;

    fn demux(&self, blob: &SegmentBlob) -> DvrResult<DemuxedTrack<Self::Params, Self::Payload>> {
        let kind = blob.media_kind();
        let mut file = tempfile::Builder::new()
            .prefix(&format!("livedvr-{kind}-"))
            .tempfile()?;
        file.write_all(blob.as_bytes())?;
        file.flush()?;

        let c_path = path_to_cstring(file.path())?;
        let mut input = AVFormatContextInput::open(&c_path, None, &mut None)?;

        let Some((stream_index, params, time_base)) = input
            .streams()
            .into_iter()
            .enumerate()
            .find(|(_, stream)| {
                let codec_type = stream.codecpar().codec_type();
                match kind {
                    MediaKind::Audio => codec_type.is_audio(),
                    MediaKind::Video => codec_type.is_video(),
                }
            })
            .map(|(index, stream)| (index, stream.codecpar().clone(), stream.time_base))
        else {
            return Err(DvrError::EmptyStream(kind));
        };

        let mut packets = Vec::new();
        while let Some(packet) = input.read_packet()? {
            if packet.stream_index as usize != stream_index {
                continue;
            }
            packets.push(Packet {
                decode_timestamp: (packet.dts != NO_TIMESTAMP).then_some(packet.dts),
                duration: packet.duration,
                payload: packet,
                stream_affinity: kind,
            });
        }

        Ok(DemuxedTrack {
            params,
            time_base: to_time_base(time_base),
            packets,
        })
    }
}

/// Output file written by libavformat. The container is chosen from the file
/// extension. Nothing is created on disk until the first track is added.
pub struct FfmpegSink {
    path: CString,
    context: Option<AVFormatContextOutput>,
    input_time_bases: Vec<AVRational>,
}

impl FfmpegSink {
    pub fn create(path: impl AsRef<Path>) -> DvrResult<Self> {
        Ok(Self {
            path: path_to_cstring(path.as_ref())?,
            context: None,
            input_time_bases: Vec::new(),
        })
    }

    fn context(&mut self) -> DvrResult<&mut AVFormatContextOutput> {
        if self.context.is_none() {
            self.context = Some(AVFormatContextOutput::create(&self.path, None)?);
        }
        self.context
            .as_mut()
            .ok_or_else(|| std::io::Error::other("output context unavailable").into())
    }
}

impl MuxSink<AVCodecParameters, AVPacket> for FfmpegSink {
    fn add_track(
        &mut self,
        _kind: MediaKind,
        params: &AVCodecParameters,
        time_base: TimeBase,
    ) -> DvrResult<usize> {
        let input_time_base = ra(time_base.num, time_base.den);
        let context = self.context()?;

        let mut codecpar = params.clone();
        {
            let codecpar = unsafe { codecpar.deref_mut() };
            codecpar.codec_tag = 0;
        }
        let mut output_stream = context.new_stream();
        output_stream.codecpar_mut().copy(&codecpar);
        output_stream.set_time_base(input_time_base);
        let index = output_stream.index as usize;

        self.input_time_bases.push(input_time_base);
        Ok(index)
    }

    fn write_header(&mut self) -> DvrResult<()> {
        self.context()?.write_header(&mut None)?;
        Ok(())
    }

    fn write_packet(&mut self, track: usize, packet: TimedPacket<AVPacket>) -> DvrResult<()> {
        let input_time_base = self.input_time_bases[track];
        let context = self.context()?;
        // the muxer may pick its own time base in write_header
        let output_time_base = context.streams()[track].time_base;

        let mut payload = packet.payload;
        payload.set_dts(packet.timestamp);
        payload.set_pts(packet.timestamp);
        payload.set_duration(packet.duration);
        payload.rescale_ts(input_time_base, output_time_base);
        payload.set_stream_index(track as i32);
        payload.set_pos(-1);

        context.interleaved_write_frame(&mut payload)?;
        Ok(())
    }

    fn finish(&mut self) -> DvrResult<()> {
        self.context()?.write_trailer()?;
        Ok(())
    }
}

/// Muxes both blobs into `output` on a blocking thread.
pub async fn mux_to_file(
    output: PathBuf,
    audio: SegmentBlob,
    video: SegmentBlob,
) -> DvrResult<MuxSummary> {
    install_log_callback();

    tokio::task::spawn_blocking(move || -> DvrResult<MuxSummary> {
        let mut sink = FfmpegSink::create(&output)?;
        let summary = StreamMuxer::new(FfmpegDemuxer).mux(&mut sink, &audio, &video)?;
        tracing::info!("Wrote {}", output.display());
        Ok(summary)
    })
    .await?
}
