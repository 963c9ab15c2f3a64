use std::path::PathBuf;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use n5_denoise::app::{App, PredictRequest, PredictResult, TrainRequest, TrainResult, check_input};
use n5_denoise::config::ConfigLoader;
use n5_denoise::domain::{SetupId, SetupSelection, TileCounts};
use n5_denoise::error::DenoiseError;
use n5_denoise::model::ExternalModel;
use n5_denoise::output::{JsonOutput, TracingSink};
use n5_denoise::tiling::InferenceOptions;

#[derive(Parser)]
#[command(name = "n5-denoise")]
#[command(about = "Noise2Void denoising for multi-resolution N5 microscopy volumes")]
#[command(version, author)]
struct Cli {
    /// Print a JSON summary to stdout instead of progress logs.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Denoise setups of an N5 container and rebuild their pyramids")]
    Predict(PredictArgs),
    #[command(about = "Train a model from lazily sampled patches")]
    Train(TrainArgs),
}

#[derive(Args)]
struct PredictArgs {
    /// Trained model directory.
    model_path: Utf8PathBuf,

    /// Input N5 container.
    n5_file: Utf8PathBuf,

    #[arg(long, num_args = 3, value_names = ["Z", "Y", "X"], default_values_t = [8, 8, 8])]
    ntiles: Vec<usize>,

    #[arg(long, default_value_t = 8)]
    n_threads: usize,

    /// Invert intensities of the denoised output.
    #[arg(short, long)]
    invert: bool,

    #[arg(short = 's', long, num_args = 1.., required = true)]
    setup_ids: Vec<u32>,

    /// Directory for the output container (default: next to the input).
    #[arg(short = 'o', long)]
    out_path: Option<Utf8PathBuf>,

    /// Context voxels added around each tile.
    #[arg(long, default_value_t = 0)]
    halo: usize,

    #[arg(long, env = "N5_DENOISE_RUNNER")]
    runner: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    /// Project configuration (JSON).
    #[arg(long)]
    n2v_project: Utf8PathBuf,

    /// Input N5 container.
    n5_file: Utf8PathBuf,

    /// Setups to train on, as `start:stop:step`.
    #[arg(short = 's', long, default_value = ":", allow_hyphen_values = true)]
    setup_ids: SetupSelection,

    #[arg(long, env = "N5_DENOISE_RUNNER")]
    runner: Option<PathBuf>,

    /// History file (default: `<model name>_history.json`).
    #[arg(long)]
    history: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DenoiseError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DenoiseError) -> u8 {
    match error {
        DenoiseError::MissingPath(_)
        | DenoiseError::NotN5(_)
        | DenoiseError::AxesMismatch { .. }
        | DenoiseError::UnsupportedRank(_)
        | DenoiseError::InvalidTileCounts(_)
        | DenoiseError::InvalidSelection(_)
        | DenoiseError::NoSetups(_)
        | DenoiseError::ConfigRead(_)
        | DenoiseError::ConfigParse(_)
        | DenoiseError::InvalidConfig(_)
        | DenoiseError::InvertUnsupported(_)
        | DenoiseError::UnsupportedDataType(_)
        | DenoiseError::PatchTooLarge { .. }
        | DenoiseError::GroupNotFound(_)
        | DenoiseError::DatasetNotFound(_) => 2,
        DenoiseError::MissingTool(_) | DenoiseError::Model(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Predict(args) => run_predict(args, cli.json),
        Commands::Train(args) => run_train(args, cli.json),
    }
}

fn run_predict(args: PredictArgs, json: bool) -> miette::Result<()> {
    let n_tiles = match args.ntiles.as_slice() {
        [z, y, x] => TileCounts::new([*z, *y, *x])?,
        other => {
            return Err(DenoiseError::InvalidTileCounts(format!("{other:?}")).into());
        }
    };
    info!(
        model = %args.model_path,
        input = %args.n5_file,
        ?n_tiles,
        n_threads = args.n_threads,
        invert = args.invert,
        setups = ?args.setup_ids,
        halo = args.halo,
        "predict"
    );

    let model = ExternalModel::open(
        ExternalModel::resolve_runner(args.runner.as_deref())?,
        args.model_path,
    )?;
    check_input(&args.n5_file)?;

    let request = PredictRequest {
        input: args.n5_file,
        out_dir: args.out_path,
        setups: args.setup_ids.into_iter().map(SetupId::new).collect(),
        options: InferenceOptions {
            n_tiles,
            halo: args.halo,
            invert: args.invert,
        },
        n_threads: args.n_threads,
    };

    let app = App::new(model);
    if json {
        let result = app.predict(&request, &JsonOutput)?;
        JsonOutput::print_predict(&result).into_diagnostic()?;
    } else {
        let result = app.predict(&request, &TracingSink)?;
        print_predict_summary(&result);
    }
    Ok(())
}

fn run_train(args: TrainArgs, json: bool) -> miette::Result<()> {
    let config = ConfigLoader::resolve(&args.n2v_project)?;
    info!(input = %args.n5_file, setups = %args.setup_ids, "train");
    info!(
        name = %config.name,
        n_patches_per_image = config.n_patches_per_image,
        patch_size = ?config.patch_size,
        train_steps_per_epoch = config.train_steps_per_epoch,
        train_epochs = config.train_epochs,
        train_batch_size = config.train_batch_size,
        train_loss = %config.train_loss,
        seed = ?config.seed,
        "project configuration"
    );
    check_input(&args.n5_file)?;

    let model_name = config.model_name(&args.setup_ids);
    let model_dir = model_root(&args.n5_file).join(&model_name);
    let model = ExternalModel::create(
        ExternalModel::resolve_runner(args.runner.as_deref())?,
        model_dir,
    );

    let request = TrainRequest {
        input: args.n5_file,
        config,
        selection: args.setup_ids,
        history_path: args.history,
    };

    let mut app = App::new(model);
    if json {
        let result = app.train(&request, &JsonOutput)?;
        JsonOutput::print_train(&result).into_diagnostic()?;
    } else {
        let result = app.train(&request, &TracingSink)?;
        print_train_summary(&result, app.model().model_dir());
    }
    Ok(())
}

/// Models are stored next to the container they were trained on.
fn model_root(input: &Utf8Path) -> &Utf8Path {
    input.parent().unwrap_or(Utf8Path::new(""))
}

fn print_predict_summary(result: &PredictResult) {
    println!("output: {}", result.output);
    for summary in &result.setups {
        println!("  {}: {}", summary.setup, summary.levels.join(", "));
    }
}

fn print_train_summary(result: &TrainResult, model_dir: &Utf8Path) {
    println!("model: {} ({model_dir})", result.model_name);
    let setups = result
        .setups
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    println!("setups: {}", setups.join(", "));
    println!(
        "patches: {} train, {} validation",
        result.train_patches, result.validation_patches
    );
    println!(
        "history: {} ({} epochs)",
        result.history_path,
        result.history.epochs()
    );
}
