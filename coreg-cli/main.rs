use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use coreg_align::AlignmentPipeline;
use coreg_cli::{
    default_align_config, init_thread_pool, load_config, load_luma, run_sample, sample_window, BatchSummary,
    CliResult, SampleResult, SampleSpec,
};
use coreg_core::DetectorMode;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

#[derive(Parser)]
#[command(name = "coreg")]
#[command(about = "Align random crops of a label-free / stained image pair and report similarity gains")]
#[command(version)]
struct Cli {
    /// Reference (label-free) image.
    #[arg(long)]
    label_free: PathBuf,

    /// Image to align onto the reference (stained).
    #[arg(long)]
    stained: PathBuf,

    /// Number of random crops to evaluate.
    #[arg(long, default_value = "50")]
    samples: usize,

    /// Smallest crop side in pixels.
    #[arg(long, default_value = "2000")]
    min_size: u32,

    /// Largest crop side in pixels.
    #[arg(long, default_value = "4000")]
    max_size: u32,

    /// Alignment settings (TOML, or JSON for a .json extension).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feature detector, overriding the config file: sift or orb.
    #[arg(long)]
    mode: Option<DetectorMode>,

    /// Directory receiving the crops of failed samples as TIFF.
    #[arg(long)]
    failures_dir: Option<PathBuf>,

    /// Base seed for crop sampling; random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (default: number of CPUs).
    #[arg(long)]
    threads: Option<usize>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_align_config(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    log::info!("{}", config.summary());

    init_thread_pool(cli.threads.unwrap_or_else(num_cpus::get))?;

    let label_free = load_luma(&cli.label_free)?;
    let stained = load_luma(&cli.stained)?;
    let width = label_free.width().min(stained.width());
    let height = label_free.height().min(stained.height());
    log::info!(
        "loaded {} ({}x{}) and {} ({}x{})",
        cli.label_free.display(),
        label_free.width(),
        label_free.height(),
        cli.stained.display(),
        stained.width(),
        stained.height()
    );

    let pipeline = AlignmentPipeline::new(config)?;
    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());
    let spec = SampleSpec {
        min_size: cli.min_size,
        max_size: cli.max_size,
    };
    log::info!(
        "evaluating {} crops on {} threads, seed {}",
        cli.samples,
        rayon::current_num_threads(),
        seed
    );

    let failures_dir = cli.failures_dir.as_deref();
    let results: Vec<SampleResult> = (0..cli.samples)
        .into_par_iter()
        .map(|index| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(index as u64);
            let window = sample_window(&mut rng, width, height, spec);
            log::info!("sample {}: crop at {}", index, window);
            run_sample(&pipeline, &label_free, &stained, index, window, failures_dir)
        })
        .collect::<CliResult<Vec<_>>>()?;

    for result in &results {
        print_result(result);
    }
    println!("{}", BatchSummary::from_results(&results));
    Ok(())
}

fn print_result(result: &SampleResult) {
    match &result.outcome {
        Ok(scores) => {
            println!("#{:<3} {}", result.index, result.window);
            println!("     before: {}", scores.before);
            println!("     after:  {}", scores.after);
            println!("     {}", scores.delta);
        }
        Err(err) => println!("#{:<3} {}  failed: {}", result.index, result.window, err),
    }
}
