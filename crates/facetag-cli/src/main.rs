use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facetag_core::DetectionResult;
use facetag_session::{
    annotation_lines, Config, DisplaySize, ImageSequenceSource, OverlayRenderer, RasterCanvas,
    Session,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facetag", about = "Face detection, identity tagging and training")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and identify every face in one image
    Recognize {
        image: PathBuf,
        /// Write the annotated overlay composite here (PNG)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture images under a label and train them into the store
    Enroll {
        /// Identity shown in the images
        #[arg(short, long)]
        label: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Recognize this image after training
        #[arg(short, long)]
        query: Option<PathBuf>,
    },
    /// Run the live detection loop over a directory of frames
    Watch {
        dir: PathBuf,
        /// Stop after this many result updates
        #[arg(short, long, default_value_t = 10)]
        updates: usize,
        /// Replay the directory from the start when it runs out
        #[arg(long = "loop")]
        looping: bool,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Give up after this many seconds without a new result
        #[arg(long, default_value_t = 5)]
        idle_secs: u64,
    },
    /// List bootstrap catalog identities and images
    Catalog,
    /// Show expected model files and whether they exist
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Recognize {
            image,
            output,
            json,
        } => recognize(&config, &image, output.as_deref(), json).await?,
        Commands::Enroll {
            label,
            images,
            query,
        } => enroll(&config, &label, &images, query.as_deref()).await?,
        Commands::Watch {
            dir,
            updates,
            looping,
            width,
            height,
            idle_secs,
        } => {
            let display = DisplaySize::new(width, height);
            watch(&config, &dir, display, looping, updates, Duration::from_secs(idle_secs)).await?
        }
        Commands::Catalog => {
            let catalog = config.catalog()?;
            for identity in &catalog.identities {
                println!("{} ({} images)", identity.label, identity.images.len());
                for image in &identity.images {
                    let mark = if image.exists() { "ok" } else { "missing" };
                    println!("  [{mark}] {}", image.display());
                }
            }
        }
        Commands::Models => {
            println!("model dir: {}", config.model_dir.display());
            for (name, path) in config.model_paths().iter() {
                let mark = if path.exists() { "ok" } else { "missing" };
                println!("  {name:<11} [{mark}] {}", path.display());
            }
        }
    }

    Ok(())
}

fn load_image(path: &Path) -> Result<Arc<RgbImage>> {
    let image = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_rgb8();
    Ok(Arc::new(image))
}

fn print_results(results: &[DetectionResult]) {
    if results.is_empty() {
        println!("no faces");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        let b = &result.bounding_box;
        println!(
            "face {i}: {} (distance {:.3}) at {:.0},{:.0} {:.0}x{:.0}",
            result.matched_label, result.match_distance, b.x, b.y, b.width, b.height
        );
        for line in annotation_lines(result) {
            println!("    {line}");
        }
    }
}

async fn recognize(config: &Config, path: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let session = Session::start(config).await?;
    let image = load_image(path)?;
    let display = DisplaySize::new(image.width(), image.height());

    let mut renderer = OverlayRenderer::new(RasterCanvas::new());
    let results = session
        .recognize_still(image.clone(), display, &mut renderer)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }

    if let Some(output) = output {
        renderer
            .canvas()
            .composite_onto(&image)
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("overlay written to {}", output.display());
    }
    Ok(())
}

async fn enroll(config: &Config, label: &str, images: &[PathBuf], query: Option<&Path>) -> Result<()> {
    let mut session = Session::start(config).await?;
    for path in images {
        let queued = session.submit_capture(label, load_image(path)?)?;
        tracing::debug!(path = %path.display(), queued, "sample captured");
    }

    let report = session.train().await?;
    println!(
        "trained {label}: {} submitted, {} enrolled, {} skipped",
        report.submitted, report.enrolled, report.skipped
    );
    println!("{}", serde_json::to_string_pretty(&session.store().summary())?);

    if let Some(query) = query {
        let image = load_image(query)?;
        let display = DisplaySize::new(image.width(), image.height());
        let mut renderer = OverlayRenderer::new(RasterCanvas::new());
        let results = session.recognize_still(image, display, &mut renderer).await?;
        print_results(&results);
    }
    Ok(())
}

async fn watch(
    config: &Config,
    dir: &Path,
    display: DisplaySize,
    looping: bool,
    updates: usize,
    idle: Duration,
) -> Result<()> {
    let session = Session::start(config).await?;
    let source = ImageSequenceSource::from_dir(dir, display, looping)
        .with_context(|| format!("failed to read frames from {}", dir.display()))?;
    anyhow::ensure!(!source.is_empty(), "no frames in {}", dir.display());

    let (handle, task) = session.spawn_live(RasterCanvas::new(), source, config.frame_interval);
    let mut results = handle.results();
    handle.toggle_video().await?;
    handle.toggle_detect().await?;

    let mut seen = 0;
    while seen < updates {
        match tokio::time::timeout(idle, results.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::info!(idle_secs = idle.as_secs(), "no new results, stopping");
                break;
            }
        }
        seen += 1;
        let current = results.borrow_and_update().clone();
        println!("{}", serde_json::to_string(&current)?);
    }

    drop(handle);
    let detection_loop = task.await?;
    let annotations = detection_loop.renderer().canvas().annotations().len();
    tracing::info!(updates = seen, annotations, "watch finished");
    Ok(())
}
