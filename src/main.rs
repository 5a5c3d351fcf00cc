//! Command-line interface for synthesis and phased training.
//!
//! `vocalis synthesize` turns a text file into a WAV plus a spectrogram PNG;
//! `vocalis train --phase <phase>` runs one training phase.

#![recursion_limit = "256"]

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vocalis::conditioner::text::read_text_file;
use vocalis::corpus::PairingPolicy;
use vocalis::model::tts::SynthesisOptions;
use vocalis::perf;
use vocalis::runtime::{resolve_config, RuntimeParams, TtsRuntime, DEFAULT_SEED};
use vocalis::training::{run_phase, Phase, PhaseOutcome, SparsityOptions, TrainingOptions};
use vocalis::TtsError;

#[cfg(feature = "backend-wgpu")]
use burn_wgpu::graphics::AutoGraphicsApi;
#[cfg(feature = "backend-wgpu")]
use burn_wgpu::{init_setup, Wgpu, WgpuDevice};

/// Supported compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum BackendChoice {
    /// Use the WGPU backend (GPU acceleration when available).
    Wgpu,
    /// Use the ndarray backend (CPU).
    Ndarray,
}

/// Training phase selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum PhaseChoice {
    /// Turn raw `.txt`/`.wav` pairs into processed examples.
    CorpusPrep,
    /// Train the autoregressive vocoder.
    TrainVocoder,
    /// Train the sequence-to-spectrogram encoder.
    TrainEncoder,
    /// Distill the parallel vocoder from the autoregressive one.
    TrainParallelVocoder,
}

impl From<PhaseChoice> for Phase {
    fn from(choice: PhaseChoice) -> Self {
        match choice {
            PhaseChoice::CorpusPrep => Phase::CorpusPrep,
            PhaseChoice::TrainVocoder => Phase::TrainVocoder,
            PhaseChoice::TrainEncoder => Phase::TrainEncoder,
            PhaseChoice::TrainParallelVocoder => Phase::TrainParallelVocoder,
        }
    }
}

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "vocalis")]
#[command(about = "Context-aware text-to-speech", long_about = None)]
struct Cli {
    /// Print performance summary at the end of the run.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Compute backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Ndarray, global = true)]
    backend: BackendChoice,
    /// Shorthand for `--backend wgpu`.
    #[arg(long, global = true)]
    use_gpu: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Synthesize speech from a text file.
    Synthesize(SynthesizeArgs),
    /// Run one training phase.
    Train(TrainArgs),
}

#[derive(Debug, Clone, clap::Args)]
struct SynthesizeArgs {
    /// Text file; lines are joined with spaces.
    #[arg(long)]
    input_file: Option<PathBuf>,
    /// Speaker identity known to the trained model.
    #[arg(long)]
    speaker: Option<String>,
    /// Output WAV path; a spectrogram is written to `<output>.png`.
    #[arg(long)]
    output_file: Option<PathBuf>,
    /// Utterances the autoregressive vocoder generates per batch.
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    /// Sampling temperature.
    #[arg(long, default_value_t = 0.7)]
    temperature: f32,
    /// Feature order override (80 unless the model configuration says otherwise).
    #[arg(long)]
    mgc_order: Option<usize>,
    /// Sample rate override (24000 unless the model configuration says otherwise).
    #[arg(long)]
    target_sample_rate: Option<u32>,
    /// Directory holding checkpoints, encodings and `config.yaml`.
    #[arg(long, default_value = "data/models")]
    model_dir: PathBuf,
    /// Model configuration YAML.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Decode until the stop signal fires instead of a length-proportional bound.
    #[arg(long)]
    no_bounds: bool,
    /// Sampling seed.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

#[derive(Debug, Clone, clap::Args)]
struct TrainArgs {
    /// Phase to run.
    #[arg(long, value_enum)]
    phase: Option<PhaseChoice>,
    /// Raw train folder for corpus preparation, processed train folder otherwise.
    #[arg(long)]
    train_folder: Option<PathBuf>,
    /// Raw dev folder for corpus preparation, processed dev folder otherwise.
    #[arg(long)]
    dev_folder: Option<PathBuf>,
    /// Continue from the phase's last checkpoint.
    #[arg(long)]
    resume: bool,
    /// Disable the guided-attention loss.
    #[arg(long)]
    no_guided_attention: bool,
    /// Encoder previews decode until the stop signal fires.
    #[arg(long)]
    no_bounds: bool,
    /// Final sparsity of the vocoder recurrent weights, in percent.
    #[arg(long, default_value_t = 95.0)]
    sparsity_target: f32,
    /// Sparsity increment, in percent.
    #[arg(long, default_value_t = 5.0)]
    sparsity_step: f32,
    /// Files between sparsity increments.
    #[arg(long, default_value_t = 200)]
    sparsity_increase_at: usize,
    /// Files between previews in `<data-dir>/output`.
    #[arg(long, default_value_t = 5000)]
    output_at: usize,
    /// Files between periodic checkpoints.
    #[arg(long, default_value_t = 1000)]
    checkpoint_every: usize,
    /// Crops (vocoders) or utterances (encoder) per optimizer step.
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,
    /// Epochs to run; per-phase default when absent.
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    target_sample_rate: Option<u32>,
    #[arg(long)]
    mgc_order: Option<usize>,
    /// Speaker written into generated label files.
    #[arg(long)]
    speaker: Option<String>,
    /// Rename prepared examples `<prefix>_00000`, ...
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Model configuration YAML; `<data-dir>/models/config.yaml` when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Abort corpus preparation on a `.txt` without `.wav` or the reverse.
    #[arg(long)]
    strict_pairing: bool,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

/// Entry point for the CLI.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let verbose = cli.verbose;
    let result = run(cli);
    if verbose {
        eprintln!("{}", perf::report());
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<TtsError>())
                .map(TtsError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let backend = if cli.use_gpu {
        BackendChoice::Wgpu
    } else {
        cli.backend
    };
    match cli.command {
        Commands::Synthesize(args) => match backend {
            BackendChoice::Wgpu => {
                #[cfg(feature = "backend-wgpu")]
                {
                    let device = WgpuDevice::default();
                    init_setup::<AutoGraphicsApi>(&device, Default::default());
                    run_synthesize::<Wgpu>(args, &device)
                }
                #[cfg(not(feature = "backend-wgpu"))]
                {
                    let _ = args;
                    anyhow::bail!("WGPU backend not enabled; build with --features backend-wgpu");
                }
            }
            BackendChoice::Ndarray => run_synthesize::<NdArray<f32>>(args, &NdArrayDevice::default()),
        },
        Commands::Train(args) => match backend {
            BackendChoice::Wgpu => {
                #[cfg(feature = "backend-wgpu")]
                {
                    let device = WgpuDevice::default();
                    init_setup::<AutoGraphicsApi>(&device, Default::default());
                    run_train::<Autodiff<Wgpu>>(args, &device)
                }
                #[cfg(not(feature = "backend-wgpu"))]
                {
                    let _ = args;
                    anyhow::bail!("WGPU backend not enabled; build with --features backend-wgpu");
                }
            }
            BackendChoice::Ndarray => {
                run_train::<Autodiff<NdArray<f32>>>(args, &NdArrayDevice::default())
            }
        },
    }
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T, TtsError> {
    value.ok_or_else(|| TtsError::Configuration(format!("{flag} is required")))
}

fn run_synthesize<B: Backend>(args: SynthesizeArgs, device: &B::Device) -> Result<()> {
    let input = required(args.input_file, "--input-file")?;
    let speaker = required(args.speaker, "--speaker")?;
    let output = required(args.output_file, "--output-file")?;
    if args.batch_size == 0 {
        return Err(TtsError::Configuration("--batch-size must be at least 1".into()).into());
    }

    let text = read_text_file(&input)?;
    let params = RuntimeParams {
        config_path: args.config,
        mgc_order: args.mgc_order,
        sample_rate: args.target_sample_rate,
        options: SynthesisOptions {
            temperature: args.temperature,
            batch_size: args.batch_size,
            unbounded: args.no_bounds,
        },
        seed: args.seed,
    };
    let mut runtime = TtsRuntime::<B>::from_model_dir(&args.model_dir, params, device)
        .with_context(|| format!("loading models from {}", args.model_dir.display()))?;
    let synthesis = runtime.synthesize_to_file(&text, &speaker, &output)?;
    tracing::info!(
        output = %output.display(),
        samples = synthesis.waveform.len(),
        frames = synthesis.features.frames(),
        "synthesis finished"
    );
    Ok(())
}

fn run_train<B: AutodiffBackend>(args: TrainArgs, device: &B::Device) -> Result<()> {
    let phase: Phase = required(args.phase, "--phase")?.into();
    let models_dir = args.data_dir.join("models");
    let config = resolve_config(
        &models_dir,
        args.config.as_deref(),
        args.mgc_order,
        args.target_sample_rate,
    )?;

    let mut options = TrainingOptions::new(phase, args.data_dir);
    options.train_folder = args.train_folder;
    options.dev_folder = args.dev_folder;
    options.resume = args.resume;
    options.guided_attention = !args.no_guided_attention;
    options.unbounded = args.no_bounds;
    options.sparsity = SparsityOptions {
        target: args.sparsity_target,
        step: args.sparsity_step,
        increase_at: args.sparsity_increase_at,
    };
    options.output_at = args.output_at;
    options.checkpoint_every = args.checkpoint_every;
    options.batch_size = args.batch_size;
    options.learning_rate = args.learning_rate;
    options.epochs = args.epochs;
    options.speaker = args.speaker;
    options.prefix = args.prefix;
    options.pairing = if args.strict_pairing {
        PairingPolicy::Fatal
    } else {
        PairingPolicy::Warn
    };
    options.seed = args.seed;
    options.config = config;

    match run_phase::<B>(&options, device)? {
        PhaseOutcome::Corpus(report) => {
            println!(
                "prepared {} train and {} dev examples ({} unpaired)",
                report.train.processed.len(),
                report.dev.processed.len(),
                report.unpaired()
            );
        }
        PhaseOutcome::Trained(progress) => {
            println!(
                "{phase} finished at epoch {} after {} files",
                progress.epoch, progress.files_processed
            );
        }
    }
    Ok(())
}
