mod args;

use std::{
    io::{BufRead, Write},
    path::Path,
    time::Duration,
};

use anyhow::{bail, Context};
use args::DvrArgs;
use chrono::Local;
use fake_user_agent::get_chrome_rua;
use livedvr::{
    fetch::SegmentFetcher,
    locator::ManifestLocator,
    manifest::{Manifest, StreamDescriptor},
    pipeline::{DownloadPlan, Pipeline},
    util::path::OutputPath,
    DvrError, HttpClient,
};
use reqwest::ClientBuilder;
use tracing::level_filters::LevelFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_formats(manifest: &Manifest) {
    let timing = &manifest.timing;
    let earliest = timing.earliest_available().with_timezone(&Local);
    let window = timing.available_window();
    println!(
        "Available window: {} hours {} minutes, since {}",
        window.num_hours(),
        window.num_minutes() % 60,
        earliest.format("%d.%m.%Y %H:%M")
    );

    let print_list = |title: &str, descriptors: &[StreamDescriptor]| {
        println!("{title}:");
        for (index, descriptor) in descriptors.iter().enumerate() {
            println!("{index:>3}. {descriptor}");
        }
    };
    print_list("Audio formats", &manifest.audio);
    print_list("Video formats", &manifest.video);
}

fn confirm_overwrite(path: &Path) -> anyhow::Result<bool> {
    print!("File {} already exists. Overwrite? [y/N] ", path.display());
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn output_path(args: &DvrArgs) -> anyhow::Result<Option<OutputPath>> {
    let Some(output) = &args.output else {
        bail!("An output file is required. Use -o/--output with a .mp4 or .mkv path.");
    };
    let output = match OutputPath::new(output) {
        Ok(output) => output,
        Err(DvrError::UnsupportedOutput(path)) => {
            bail!(
                "Unsupported output file format: {}. Use .mp4 or .mkv.",
                path.display()
            )
        }
        Err(e) => return Err(e.into()),
    };

    if output.exists() && !args.overwrite && !confirm_overwrite(output.path())? {
        return Ok(None);
    }
    Ok(Some(output))
}

#[cfg(feature = "ffmpeg")]
async fn download(pipeline: &Pipeline, plan: &DownloadPlan, output: &OutputPath) -> anyhow::Result<()> {
    let summary = pipeline.download(plan, output).await?;
    tracing::info!(
        "Saved {:.0}s of video to {}",
        summary.video.duration_seconds,
        output.path().display()
    );
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
async fn download(_: &Pipeline, _: &DownloadPlan, _: &OutputPath) -> anyhow::Result<()> {
    bail!("This build has no muxer. Rebuild with the default features or `--features ffmpeg`.")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DvrArgs::parse_env();
    init_tracing(args.verbose);

    let output = if args.list_formats {
        None
    } else {
        match output_path(&args)? {
            Some(output) => Some(output),
            None => {
                tracing::info!("Keeping the existing file, nothing to do.");
                return Ok(());
            }
        }
    };

    let client = HttpClient::new(
        ClientBuilder::new()
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(60)),
    )?
    .with_connect_retries(args.connect_retries, HttpClient::DEFAULT_BACKOFF);

    let manifest_text = match ManifestLocator::new(client.clone()).locate(&args.url).await {
        Err(DvrError::ManifestUnavailable) => {
            bail!("Couldn't find the stream manifest. Make sure the URL points to a live broadcast.")
        }
        result => result?,
    };
    let manifest = Manifest::parse(&manifest_text).context("failed to read the stream manifest")?;

    if args.list_formats {
        print_formats(&manifest);
        return Ok(());
    }
    let Some(output) = output else {
        return Ok(());
    };

    let plan = match DownloadPlan::new(&manifest, args.selection(), &args.window()) {
        Err(DvrError::RangeNotYetAvailable { .. }) => {
            bail!("The requested window ends in the future. Choose an earlier end or a shorter duration.")
        }
        Err(DvrError::TimeParse(input)) => bail!("Couldn't parse date or time: {input}"),
        Err(DvrError::DurationParse(input)) => bail!("Couldn't parse duration or end date: {input}"),
        result => result?,
    };

    let fetcher = SegmentFetcher::new(client)
        .concurrency(args.download_threads)
        .retry(args.retry_policy());
    download(&Pipeline::new(fetcher), &plan, &output).await
}
