//! HLX Fused Cross-Entropy CLI
//!
//! Usage:
//!   hlx_xent_cli settings --vocab-size 32000
//!   hlx_xent_cli run --input batch.json --backward --validate-determinism 5
//!   hlx_xent_cli check --rows 16 --vocab 32000
//!
//! `run` reads `{"scores": [...], "labels": [...], "logit_softcapping": 30.0}`
//! where `scores` is row-major `labels.len() x vocab_size`.
//!
//! Set RUST_LOG=debug to see kernel launches.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hlx_cross_entropy::reference::{reference_gradient, reference_row_losses};
use hlx_cross_entropy::{
    calculate_settings, fast_cross_entropy_loss, FastCrossEntropyLoss, LaunchConfig,
    LogitTransform, LossConfig, ScoreMatrixMut, IGNORE_INDEX,
};

const CHECK_TOLERANCE: f64 = 1e-4;

/// Fused cross-entropy kernels: launch settings, batch runs and self-checks
#[derive(Parser)]
#[command(name = "hlx_xent_cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Worker threads for the row sweep (default: all cores)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the launch configuration for a vocabulary size
    Settings {
        #[arg(long)]
        vocab_size: usize,
    },
    /// Run forward (and optionally backward) on a JSON batch
    Run {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Also compute the gradient w.r.t. the scores
        #[arg(long)]
        backward: bool,

        /// Repeat the run N times and require bit-identical digests
        #[arg(long, value_name = "N")]
        validate_determinism: Option<usize>,
    },
    /// Compare the fused kernels with the reference on synthetic data
    Check {
        #[arg(long, default_value = "8")]
        rows: usize,

        #[arg(long, default_value = "1000")]
        vocab: usize,
    },
}

#[derive(Debug, Deserialize)]
struct RunInput {
    scores: Vec<f32>,
    labels: Vec<i64>,
    #[serde(flatten)]
    config: LossConfig,
    #[serde(default)]
    n_items: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    vocab_size: usize,
    launch: LaunchConfig,
    loss: f32,
    n_items: usize,
    losses: Vec<f32>,
    logsumexp: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gradient: Option<Vec<f32>>,
    digest: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            eprintln!("Error: failed to configure {} threads: {}", threads, e);
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Settings { vocab_size } => cmd_settings(vocab_size),
        Commands::Run {
            input,
            backward,
            validate_determinism,
        } => cmd_run(&input, backward, validate_determinism),
        Commands::Check { rows, vocab } => cmd_check(rows, vocab),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_settings(vocab_size: usize) -> Result<(), String> {
    let launch = calculate_settings(vocab_size).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&launch).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn load_input(path: &Path) -> Result<(RunInput, usize), String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_input(&text).map_err(|e| format!("invalid input {}: {}", path.display(), e))
}

/// Parse a run batch and infer `vocab_size` from `scores.len() / labels.len()`.
fn parse_input(text: &str) -> Result<(RunInput, usize), String> {
    let input: RunInput = serde_json::from_str(text).map_err(|e| e.to_string())?;
    input.config.validate().map_err(|e| e.to_string())?;

    if input.labels.is_empty() {
        return Err("input has no labels".to_string());
    }
    if input.scores.len() % input.labels.len() != 0 {
        return Err(format!(
            "{} scores do not split evenly into {} rows",
            input.scores.len(),
            input.labels.len()
        ));
    }
    let vocab_size = input.scores.len() / input.labels.len();
    Ok((input, vocab_size))
}

fn run_once(input: &RunInput, vocab_size: usize, backward: bool) -> Result<RunReport, String> {
    let mut scores = input.scores.clone();
    let shape = [1, input.labels.len(), vocab_size];
    let out = fast_cross_entropy_loss(&mut scores, &input.labels, shape, &input.config, input.n_items)
        .map_err(|e| e.to_string())?;

    let loss = out.loss;
    let n_items = out.n_items;
    let losses = out.losses.clone();
    let logsumexp = out.context().logsumexp().to_vec();
    let launch = out.context().launch();

    let gradient = if backward {
        Some(out.backward(1.0).map_err(|e| e.to_string())?.to_vec())
    } else {
        None
    };

    let mut hasher = Sha256::new();
    hasher.update(loss.to_le_bytes());
    for v in losses.iter().chain(&logsumexp) {
        hasher.update(v.to_le_bytes());
    }
    for v in gradient.iter().flatten() {
        hasher.update(v.to_le_bytes());
    }

    Ok(RunReport {
        vocab_size,
        launch,
        loss,
        n_items,
        losses,
        logsumexp,
        gradient,
        digest: format!("{:x}", hasher.finalize()),
    })
}

fn cmd_run(path: &Path, backward: bool, validate_determinism: Option<usize>) -> Result<(), String> {
    let (input, vocab_size) = load_input(path)?;
    let report = run_once(&input, vocab_size, backward)?;

    if let Some(runs) = validate_determinism {
        check_determinism(&input, vocab_size, backward, &report.digest, runs)?;
        eprintln!("Determinism: {} runs bit-identical ({})", runs.max(1), report.digest);
    }

    let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

/// Re-run the batch until `runs` runs in total and require `digest` each time.
fn check_determinism(
    input: &RunInput,
    vocab_size: usize,
    backward: bool,
    digest: &str,
    runs: usize,
) -> Result<(), String> {
    for run in 1..runs {
        let again = run_once(input, vocab_size, backward)?;
        if again.digest != digest {
            return Err(format!(
                "determinism check failed on run {}: {} != {}",
                run + 1,
                again.digest,
                digest
            ));
        }
    }
    Ok(())
}

/// Deterministic scores in [-4, 4] and labels with every fourth row ignored.
fn synthetic_batch(rows: usize, vocab: usize) -> Result<(Vec<f32>, Vec<i64>), String> {
    let elements = rows
        .checked_mul(vocab)
        .ok_or_else(|| format!("{} rows x {} classes overflows", rows, vocab))?;
    let scores = (0..elements)
        .map(|i| ((i * 31) as f32).sin() * 4.0)
        .collect();
    let labels = (0..rows)
        .map(|r| {
            if r % 4 == 3 {
                IGNORE_INDEX
            } else {
                ((r * 7919) % vocab) as i64
            }
        })
        .collect();
    Ok((scores, labels))
}

/// Max |fused - reference| of the losses and the gradient for one transform.
#[derive(Debug, Clone, Copy)]
struct CheckRow {
    softcap: f32,
    scale: f32,
    loss_diff: f64,
    grad_diff: f64,
}

fn compare_with_reference(rows: usize, vocab: usize) -> Result<Vec<CheckRow>, String> {
    calculate_settings(vocab).map_err(|e| e.to_string())?;
    let (scores, labels) = synthetic_batch(rows, vocab)?;
    let dlosses = vec![1.0f32; rows];
    let dlosses_ref = vec![1.0f64; rows];

    let mut table = Vec::with_capacity(4);
    for &(softcap, scale) in &[(0.0f32, 0.0f32), (10.0, 0.0), (0.0, 2.0), (10.0, 2.0)] {
        let transform = LogitTransform::new(softcap, scale);

        let mut work = scores.clone();
        let view = ScoreMatrixMut::contiguous(&mut work, vocab).map_err(|e| e.to_string())?;
        let (losses, ctx) = FastCrossEntropyLoss::forward_with(view, &labels, transform)
            .map_err(|e| e.to_string())?;
        ctx.backward(&dlosses).map_err(|e| e.to_string())?;

        let ref_losses = reference_row_losses(&scores, &labels, vocab, &transform);
        let ref_grad = reference_gradient(&scores, &labels, vocab, &transform, &dlosses_ref);

        table.push(CheckRow {
            softcap,
            scale,
            loss_diff: max_abs_diff(&losses, &ref_losses),
            grad_diff: max_abs_diff(&work, &ref_grad),
        });
    }
    Ok(table)
}

/// Fail when any row of `table` is over `tolerance`.
fn within_tolerance(table: &[CheckRow], tolerance: f64) -> Result<(), String> {
    match table
        .iter()
        .find(|r| r.loss_diff > tolerance || r.grad_diff > tolerance)
    {
        Some(r) => Err(format!(
            "fused kernels differ from reference by more than {} (softcap={} scale={})",
            tolerance, r.softcap, r.scale
        )),
        None => Ok(()),
    }
}

fn cmd_check(rows: usize, vocab: usize) -> Result<(), String> {
    let table = compare_with_reference(rows, vocab)?;

    println!("{:>10} {:>10} {:>14} {:>14}", "softcap", "scale", "max |dloss|", "max |dgrad|");
    for r in &table {
        println!(
            "{:>10} {:>10} {:>14.3e} {:>14.3e}",
            r.softcap, r.scale, r.loss_diff, r.grad_diff
        );
    }

    within_tolerance(&table, CHECK_TOLERANCE)?;
    println!("All transform combinations within {}", CHECK_TOLERANCE);
    Ok(())
}

fn max_abs_diff(fused: &[f32], reference: &[f64]) -> f64 {
    fused
        .iter()
        .zip(reference)
        .map(|(&a, &b)| (a as f64 - b).abs())
        .fold(0.0, f64::max)
}
