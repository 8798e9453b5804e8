//! lockstep-generate: run batched prefill/decode generation from a YAML
//! settings file.

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use lockstep::cli;
use lockstep::engine::{ModelRunner, PassKind};
use lockstep::settings::{self, RunnerSettings};
use lockstep::tokenizer::{ByteTokenizer, Tokenizer};

#[derive(Parser)]
#[command(name = "lockstep-generate", about = "Batched generation runner")]
struct Args {
    /// Path to the YAML settings file
    #[arg(short = 's', long)]
    settings: PathBuf,

    /// Prompt text, repeated across the batch
    #[arg(short = 'p', long, conflicts_with = "file")]
    prompt: Option<String>,

    /// Read prompts from file, one per line
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Step executor: host
    #[arg(long, default_value = "host")]
    executor: String,

    /// Skip the warm-up pass
    #[arg(long)]
    skip_warmup: bool,

    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown output format '{}'. Options: text, json", s)),
    }
}

#[derive(Serialize)]
struct Timings {
    warmup_ms: f64,
    generate_ms: f64,
    total_ms: f64,
    gen_tok_per_sec: f64,
}

#[derive(Serialize)]
struct ConfigOutput {
    model: String,
    exe_mode: String,
    quantize: String,
    world_size: usize,
    batch_size: usize,
    max_new_tokens: usize,
    seed: u64,
}

#[derive(Serialize)]
struct JsonOutput {
    executor: String,
    prompts: Vec<String>,
    outputs: Vec<String>,
    new_tokens_per_row: usize,
    steps: usize,
    stop_reason: String,
    timings: Timings,
    config: ConfigOutput,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let world_size = match std::env::var("WORLD_SIZE") {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|_| format!("Invalid WORLD_SIZE '{}'", v))?,
        Err(_) => 1,
    };

    let total_start = Instant::now();

    let raw = RunnerSettings::from_path(&args.settings)?;
    let resolved = settings::resolve(world_size, &raw)?;

    let prompts = cli::resolve_prompts(
        args.prompt.as_deref(),
        args.file.as_deref(),
        resolved.batch_size,
    )?;

    let tokenizer = ByteTokenizer::new();
    let vocab_size = tokenizer.vocab_size();
    let model = cli::executor::resolve_executor(&args.executor, &resolved, vocab_size)?;
    let mut runner = ModelRunner::new(resolved.clone(), Box::new(tokenizer), model);

    let warmup_ms = if args.skip_warmup {
        0.0
    } else {
        let warm_start = Instant::now();
        runner.generate(&prompts, PassKind::WarmUp)?;
        let warmup_ms = warm_start.elapsed().as_secs_f64() * 1000.0;
        info!(warmup_ms, "warm up finished");
        warmup_ms
    };

    let gen_start = Instant::now();
    let output = runner.generate(&prompts, PassKind::Measure)?;
    let generate_ms = gen_start.elapsed().as_secs_f64() * 1000.0;
    let total_ms = total_start.elapsed().as_secs_f64() * 1000.0;

    let new_tokens_total: usize = output.token_ids.iter().map(Vec::len).sum();
    let gen_tok_per_sec = if generate_ms > 0.0 {
        (new_tokens_total as f64) / (generate_ms / 1000.0)
    } else {
        0.0
    };

    match args.output_format.as_str() {
        "json" => {
            let json = JsonOutput {
                executor: args.executor.clone(),
                prompts: prompts.clone(),
                outputs: output.texts.clone(),
                new_tokens_per_row: output.token_ids.first().map(Vec::len).unwrap_or(0),
                steps: output.steps,
                stop_reason: output.stop_reason.to_string(),
                timings: Timings {
                    warmup_ms,
                    generate_ms,
                    total_ms,
                    gen_tok_per_sec,
                },
                config: ConfigOutput {
                    model: resolved.family.name().to_string(),
                    exe_mode: resolved.exe_mode.name().to_string(),
                    quantize: resolved.quant.name().to_string(),
                    world_size: resolved.world_size,
                    batch_size: resolved.batch_size,
                    max_new_tokens: resolved.max_new_tokens,
                    seed: resolved.seed,
                },
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            for (prompt, completion) in prompts.iter().zip(output.texts.iter()) {
                println!("{}{}", prompt, completion);
            }
        }
    }

    info!(
        steps = output.steps,
        new_tokens_total,
        stop_reason = %output.stop_reason,
        "model run success"
    );
    Ok(())
}
