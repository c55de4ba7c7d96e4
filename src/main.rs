#![warn(unused_extern_crates)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classwatch::analyzer::{FaceAnalyzer, annotate_frame, save_results};
use classwatch::config::Config;
use classwatch::engagement::FrameEngagement;
use classwatch::session::{self, JsonScoreStore, SessionRunner, load_capture, persist_session, summarize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Config file to read from. Defaults apply when unset
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Max threads per model session
    #[arg(short = 't', long)]
    max_threads: Option<usize>,

    /// Directory for annotated images and face tables
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Session score file
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a single image and print its engagement score
    Analyze {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Score a session over already captured images and store the result
    Session {
        /// Stored label. Defaults to "Session N"
        #[arg(long, default_value = "")]
        session_id: String,

        /// Seconds to wait between captures
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Free-text report stored with the score
        #[arg(long)]
        report: Option<String>,

        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },

    /// Print the mean of all stored session scores
    Institution,
}

fn load_config(args: &CmdArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let total_threads = num_cpus::get();
    if let Some(max) = args.max_threads {
        let threads = max.min(total_threads);
        config.detector.threads = Some(threads);
        config.emotion.threads = Some(threads);
    }
    if let Some(dir) = &args.output_dir {
        config.session.output_dir = dir.clone();
    }
    if let Some(store) = &args.store {
        config.session.store_path = store.clone();
    }
    if let Command::Session {
        interval_secs: Some(secs),
        ..
    } = &args.command
    {
        config.session.interval_secs = *secs;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();
    let config = load_config(&args).context("Failed to load configuration")?;
    debug!("{config:?}");

    match &args.command {
        Command::Analyze { input } => {
            let analyzer = FaceAnalyzer::from_config(&config).context("Failed to load models")?;
            let start = Instant::now();

            let mut img = load_capture(input)?;
            let frame = FrameEngagement::new(1, analyzer.analyze(&img), &config.engagement);
            debug!("Took {:?}", start.elapsed());

            std::fs::create_dir_all(&config.session.output_dir)?;
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
            let image_path = config.session.output_dir.join(format!("annotated_{stem}.jpg"));
            let csv_path = config.session.output_dir.join(format!("face_data_{stem}.csv"));
            annotate_frame(&mut img, &frame.per_face, &config)?;
            save_results(&img, &frame.per_face, &image_path, &csv_path)
                .with_context(|| format!("Failed to export results for {input:?}"))?;

            info!("{} faces", frame.per_face.len());
            println!("{:.2}", frame.score);
        }
        Command::Session {
            session_id,
            report,
            frames,
            ..
        } => {
            let analyzer = FaceAnalyzer::from_config(&config).context("Failed to load models")?;
            let runner = SessionRunner::new(&analyzer, &config);
            let result = runner.run(session_id, frames)?;

            let mut store = JsonScoreStore::new(&config.session.store_path);
            let report = report.clone().unwrap_or_else(|| summarize(&result));
            persist_session(&mut store, &result, report)
                .with_context(|| format!("Failed to store session score in {:?}", store.path()))?;

            println!("{:.2}", result.aggregate_score);
        }
        Command::Institution => {
            let store = JsonScoreStore::new(&config.session.store_path);
            let score = session::institution_score(&store)?;
            println!("{score:.2}");
        }
    }

    Ok(())
}
