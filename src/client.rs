use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use prompt_lab::{
    Config, ExperimentResult, ExperimentRunner, ModelClient, Target, Technique, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_INPUT: &str =
    "A system for managing library resources, including books, journals, and digital media.";

#[derive(Parser)]
struct Args {
    /// Model name sent to the server.
    #[clap(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Text substituted into every prompt template.
    #[clap(long, short, default_value = DEFAULT_INPUT)]
    input: String,

    /// Techniques to run: zero_shot, few_shot, cot, automated_prompt. All when omitted.
    #[clap(long, short)]
    technique: Vec<String>,

    /// Sampling temperature.
    #[clap(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,

    /// Server protocol. Either "open-webui" or "ollama".
    #[clap(long, default_value = "open-webui")]
    target: Target,

    /// Directory the `_config` search starts from.
    #[clap(long)]
    config_dir: Option<PathBuf>,

    /// Per-request timeout. Requests may block forever without it.
    #[clap(long)]
    timeout_secs: Option<u64>,

    /// Skip the chained zero_shot -> cot experiment.
    #[clap(long)]
    no_chain: bool,

    /// Debug logging.
    #[clap(long, short)]
    verbose: bool,
}

fn print_result(technique: &str, time: f64, result: Option<&serde_json::Value>) -> anyhow::Result<()> {
    println!("\nTechnique: {}\nTime Taken: {:.2}s", technique, time);
    match result {
        Some(json) => println!("{}", serde_json::to_string_pretty(json)?),
        None => println!("No valid JSON result."),
    }
    Ok(())
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let Args {
        model,
        input,
        technique,
        temperature,
        target,
        config_dir,
        timeout_secs,
        no_chain,
        verbose: _,
    } = args;

    let config = match config_dir {
        Some(dir) => Config::discover_in(&dir),
        None => Config::discover(),
    }
    .context("cannot load the model server configuration")?;
    tracing::info!(source = ?config.source(), "using configuration");

    let mut client = ModelClient::new(config).context("cannot build the HTTP client")?;
    if let Some(secs) = timeout_secs {
        client = client.with_timeout(Duration::from_secs(secs));
    }
    let runner = ExperimentRunner::new(&client).with_target(target);

    let experiments: Vec<ExperimentResult> = if technique.is_empty() {
        runner.run_all(&model, &input, temperature).await?
    } else {
        let mut experiments = Vec::with_capacity(technique.len());
        for name in &technique {
            experiments.push(runner.run(&model, name, &input, temperature).await?);
        }
        experiments
    };

    for experiment in &experiments {
        print_result(&experiment.technique, experiment.time, experiment.result.as_ref())?;
    }

    if !no_chain {
        let start = std::time::Instant::now();
        let chained = runner.chain(&model, &input).await?;
        print_result(
            &format!("{} -> {}", Technique::ZeroShot, Technique::Cot),
            start.elapsed().as_secs_f64(),
            chained.as_ref(),
        )?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    // one request in flight at a time
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))
}
