mod session;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pawtoon_contracts::chat::parse_command;
use pawtoon_contracts::models::ModelSelector;
use pawtoon_contracts::prompts::generation_prompt;
use pawtoon_contracts::{
    AnalysisMode, PipelineOptions, RemovalFailurePolicy, RunState, SourceImage,
};
use pawtoon_engine::{
    default_source_image, load_source_image, ClientSet, EngineConfig, Pipeline, RemovalProvider,
};

use session::{Flow, SessionRunner, Step};

#[derive(Debug, Parser)]
#[command(name = "pawtoon", version, about = "Turn a pet photo into a 3D cartoon sticker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze, generate and remove the background in one go.
    Run(RunArgs),
    /// Print the vision model's description of a photo.
    Analyze(AnalyzeArgs),
    /// Print the generation prompt without calling any service.
    Prompt(PromptArgs),
    /// Interactive session driven by slash commands on stdin.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct ClientArgs {
    #[arg(long)]
    analysis_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// Background removal service (removebg or dryrun).
    #[arg(long)]
    removal: Option<RemovalProvider>,
    /// Use the offline dryrun clients for everything.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct PipelineArgs {
    #[arg(long, default_value = "fused")]
    mode: AnalysisMode,
    #[arg(long)]
    no_removebg: bool,
    #[arg(long, default_value = "warn")]
    policy: RemovalFailurePolicy,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Pet photo; the built-in placeholder when omitted.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Additional instructions for the generated character.
    #[arg(long)]
    instructions: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    clients: ClientArgs,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    clients: ClientArgs,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long, conflicts_with = "analysis_file")]
    analysis: Option<String>,
    #[arg(long)]
    analysis_file: Option<PathBuf>,
    #[arg(long)]
    instructions: Option<String>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    clients: ClientArgs,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pawtoon error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_once(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Session(args) => run_session(args),
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let pipeline = build_pipeline(&args.clients, pipeline_options(&args.pipeline))?;
    let mut runner = SessionRunner::start(pipeline, &args.out, args.events.clone())?;
    runner
        .pipeline_mut()
        .set_image(source_image(args.image.as_deref())?);
    runner.pipeline_mut().set_instructions(args.instructions.clone());

    let outcome = runner.execute(Step::Full)?;
    let mut stdout = io::stdout();
    runner.report(outcome, Step::Full, &mut stdout)?;
    let failed = runner.pipeline().state().run_state() == RunState::Failed;
    let summary = runner.finish()?;
    for path in &summary.artifacts {
        println!("Saved {}", path.display());
    }
    Ok(if failed { 1 } else { 0 })
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut pipeline = build_pipeline(&args.clients, PipelineOptions::default())?;
    pipeline.set_image(source_image(args.image.as_deref())?);
    match pipeline.run_analysis() {
        Ok(()) => {
            println!("{}", pipeline.state().analysis().unwrap_or_default());
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", err.message);
            Ok(1)
        }
    }
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let analysis = match &args.analysis_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => args.analysis.clone(),
    };
    println!(
        "{}",
        generation_prompt(analysis.as_deref(), args.instructions.as_deref())
    );
    Ok(0)
}

fn run_session(args: SessionArgs) -> Result<i32> {
    let pipeline = build_pipeline(&args.clients, pipeline_options(&args.pipeline))?;
    for note in &pipeline.clients().notes {
        eprintln!("pawtoon: {note}");
    }
    let mut runner = SessionRunner::start(pipeline, &args.out, args.events.clone())?;
    if let Some(path) = args.image.as_deref() {
        runner.pipeline_mut().set_image(load_source_image(path)?);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    println!("Pawtoon session {} started. Type /help for commands.", runner.session_id());

    loop {
        print!("> ");
        stdout.flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        if runner.handle(command, &mut stdout)? == Flow::Quit {
            break;
        }
    }

    let summary = runner.finish()?;
    println!(
        "Session finished: {} runs ({} done, {} failed).",
        summary.total_runs, summary.completed_runs, summary.failed_runs
    );
    Ok(0)
}

fn pipeline_options(args: &PipelineArgs) -> PipelineOptions {
    PipelineOptions {
        analysis_mode: args.mode,
        remove_background: !args.no_removebg,
        removal_failure_policy: args.policy,
    }
}

fn build_pipeline(args: &ClientArgs, options: PipelineOptions) -> Result<Pipeline> {
    let clients = if args.dryrun {
        if args.analysis_model.is_some() || args.image_model.is_some() || args.removal.is_some() {
            bail!("--dryrun cannot be combined with --analysis-model, --image-model or --removal");
        }
        ClientSet::dryrun()
    } else {
        let mut config = EngineConfig::from_env();
        if let Some(model) = &args.analysis_model {
            config.analysis_model = Some(model.clone());
        }
        if let Some(model) = &args.image_model {
            config.image_model = Some(model.clone());
        }
        ClientSet::from_config(&config, &ModelSelector::default(), args.removal)?
    };
    Ok(Pipeline::new(clients, options))
}

fn source_image(path: Option<&Path>) -> Result<SourceImage> {
    match path {
        Some(path) => load_source_image(path),
        None => default_source_image(),
    }
}
