use std::{ffi::OsString, num::NonZeroU32, path::PathBuf, time::Duration};

use clap::Parser;
use livedvr::{
    fetch::SegmentFetcher, pipeline::StreamSelection, range::WindowRequest, retry::RetryPolicy,
    HttpClient,
};

fn default_threads() -> NonZeroU32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    NonZeroU32::new(cpus)
        .unwrap_or(NonZeroU32::MIN)
        .min(SegmentFetcher::MAX_CONCURRENCY)
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct DvrArgs {
    /// URL of the live broadcast page
    pub url: String,

    /// List available formats and the rewindable window, then exit
    #[clap(short, long)]
    pub list_formats: bool,

    /// Audio format index from --list-formats. 0 is the best quality.
    #[clap(short = 'a', long = "af", default_value_t = 0)]
    pub audio_format: usize,

    /// Video format index from --list-formats. 0 is the best quality.
    #[clap(short = 'v', long = "vf", default_value_t = 0)]
    pub video_format: usize,

    /// Read times as UTC instead of local time
    #[clap(long)]
    pub utc: bool,

    /// Start of the window
    ///
    /// Accepts "YYYY-MM-DDTHH:MM", "DD.MM.YYYY HH:MM", "DD.MM HH:MM" or "HH:MM".
    /// Defaults to the earliest available moment.
    #[clap(short, long)]
    pub start: Option<String>,

    /// End of the window, in the same formats as --start
    #[clap(short, long, conflicts_with = "duration")]
    pub end: Option<String>,

    /// Length of the window, e.g. "1h30m", "90m" or "5400"
    #[clap(short, long)]
    pub duration: Option<String>,

    /// Number of parallel segment downloads, at most 4
    #[clap(long, env = "LIVEDVR_THREADS", default_value_t = default_threads())]
    pub download_threads: NonZeroU32,

    /// Attempts per segment before giving up. 0 retries forever.
    #[clap(long, default_value_t = 0)]
    pub retries: u32,

    /// Seconds to wait between attempts
    #[clap(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Times a request is repeated when the connection itself fails
    #[clap(long, default_value_t = HttpClient::DEFAULT_CONNECT_RETRIES)]
    pub connect_retries: u32,

    /// Overwrite the output file without asking
    #[clap(short = 'y', long = "yes")]
    pub overwrite: bool,

    /// Output file, ending in .mp4 or .mkv
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Debug output
    #[clap(long)]
    pub verbose: bool,
}

impl DvrArgs {
    /// Parses the command line, accepting the single-dash `-af` and `-vf` spellings.
    pub fn parse_env() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn window(&self) -> WindowRequest {
        WindowRequest {
            start: self.start.clone(),
            end: self.end.clone(),
            duration: self.duration.clone(),
            utc: self.utc,
        }
    }

    pub fn selection(&self) -> StreamSelection {
        StreamSelection {
            audio: self.audio_format,
            video: self.video_format,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.retry_delay);
        match NonZeroU32::new(self.retries) {
            Some(attempts) => RetryPolicy::bounded(attempts, delay),
            None => RetryPolicy::indefinite(delay),
        }
    }
}

pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-af") => OsString::from("--af"),
            Some("-vf") => OsString::from("--vf"),
            _ => arg,
        })
        .collect()
}
