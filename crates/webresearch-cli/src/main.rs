use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use webresearch_core::{
    Config, ConfigLoader, ProgressUpdate, ResearchLoop, ResearchOptions, Session,
    TelemetryOptions, init_metrics_from_env, init_telemetry, persist_report, preview,
    read_session_log, remove_session_log,
};

const ANALYSIS_PREVIEW: usize = 200;

#[derive(Parser, Debug)]
#[command(
    name = "webresearch",
    version,
    about = "Iterative web research with self-evaluating answers"
)]
struct Cli {
    /// Path to a TOML configuration file (defaults to `webresearch.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a question and save a report.
    Run(RunArgs),
    /// Print the journal recorded for a session.
    Log(SessionArgs),
    /// Delete the journal recorded for a session.
    Forget(SessionArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to research.
    question: String,

    /// Number of search queries to generate.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    searches: Option<u32>,

    /// Maximum number of answer evaluation attempts.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    rewordings: Option<u32>,

    /// Print every progress update and the research steps.
    #[arg(short, long)]
    verbose: bool,

    /// Directory the text report is written to.
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Print the finished session as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Optional session ID (letters, digits, `-` and `_`).
    #[arg(long)]
    session: Option<String>,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Session ID whose journal should be used.
    session: String,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load(cli.config)?;

    let verbose = matches!(&cli.command, Command::Run(args) if args.verbose);
    let level = if verbose {
        config.logging.level.clone()
    } else {
        "warn".to_string()
    };
    init_telemetry(TelemetryOptions::with_level(level))?;
    init_metrics_from_env("webresearch-cli");

    match cli.command {
        Command::Run(args) => {
            let rt = Runtime::new()?;
            rt.block_on(run_command(args, config))
        }
        Command::Log(args) => log_command(args, &config),
        Command::Forget(args) => forget_command(args, &config),
    }
}

async fn run_command(args: RunArgs, config: Config) -> Result<()> {
    let research = ResearchLoop::from_config(&config)?;

    let mut options = ResearchOptions::from_config(&config.research);
    if let Some(searches) = args.searches {
        options = options.with_searches(searches);
    }
    if let Some(rewordings) = args.rewordings {
        options = options.with_rewordings(rewordings);
    }
    if let Some(session) = &args.session {
        options = options.with_session_id(session.clone());
    }

    let (tx, rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let printer = tokio::spawn(print_progress(rx, args.verbose, ProgressStream::for_run(&args)));
    options = options.with_progress(Arc::new(tx));

    if !args.json {
        println!("Starting research for: {}", args.question);
        println!(
            "Search queries: {}, max evaluation attempts: {}",
            options.num_searches, options.num_rewordings
        );
        println!("{}", "-".repeat(60));
    }
    info!(question = %args.question, "starting research session");

    let outcome = research.research(&args.question, options).await;
    if let Err(err) = printer.await {
        warn!(error = %err, "progress printer stopped unexpectedly");
    }
    let session = outcome.context("research failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print!("{}", render_summary(&session, args.verbose));
    }

    match persist_report(&args.output_dir, &session) {
        Ok(path) if !args.json => println!("\nResults saved to: {}", path.display()),
        Ok(path) => info!(path = %path.display(), "report saved"),
        Err(err) => warn!(error = %err, "could not save results to file"),
    }
    Ok(())
}

fn log_command(args: SessionArgs, config: &Config) -> Result<()> {
    let dir = journal_dir(config)?;
    let contents = read_session_log(&dir, &args.session)?
        .ok_or_else(|| anyhow!("no journal found for session {}", args.session))?;
    print!("{contents}");
    Ok(())
}

fn forget_command(args: SessionArgs, config: &Config) -> Result<()> {
    let dir = journal_dir(config)?;
    if remove_session_log(&dir, &args.session)? {
        println!("Removed journal for session {}", args.session);
    } else {
        println!("No journal found for session {}", args.session);
    }
    Ok(())
}

fn journal_dir(config: &Config) -> Result<PathBuf> {
    config
        .logging
        .dir
        .clone()
        .ok_or_else(|| anyhow!("session journals are disabled (logging.dir is not set)"))
}

/// Where progress lines go; stdout is reserved for the document in `--json` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressStream {
    Stdout,
    Stderr,
}

impl ProgressStream {
    fn for_run(args: &RunArgs) -> Self {
        if args.json {
            ProgressStream::Stderr
        } else {
            ProgressStream::Stdout
        }
    }
}

async fn print_progress(
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
    verbose: bool,
    stream: ProgressStream,
) {
    let mut last_step = None;
    while let Some(update) = updates.recv().await {
        if let Some(line) = progress_line(&update, verbose, &mut last_step) {
            match stream {
                ProgressStream::Stdout => println!("{line}"),
                ProgressStream::Stderr => eprintln!("{line}"),
            }
        }
    }
}

/// Verbose mode prints every update; otherwise one line per phase change.
fn progress_line(update: &ProgressUpdate, verbose: bool, last_step: &mut Option<u32>) -> Option<String> {
    if verbose {
        return Some(format!(
            "[{}] Step {}/{}: {}",
            update.timestamp.format("%H:%M:%S"),
            update.step_number,
            update.total_steps,
            update.message
        ));
    }
    if *last_step == Some(update.step_number) {
        return None;
    }
    *last_step = Some(update.step_number);
    Some(format!(
        "Step {}/{}: {}",
        update.step_number, update.total_steps, update.status
    ))
}

fn render_summary(session: &Session, verbose: bool) -> String {
    let rule = "=".repeat(60);
    let thin = "-".repeat(40);
    let mut lines = vec![
        String::new(),
        rule.clone(),
        "RESEARCH RESULTS".to_string(),
        rule.clone(),
        String::new(),
        "ANSWER:".to_string(),
        thin.clone(),
        session.answer.clone(),
    ];

    if verbose && !session.steps.is_empty() {
        lines.push(String::new());
        lines.push(format!("RESEARCH STEPS ({} steps):", session.steps.len()));
        lines.push(thin.clone());
        for step in &session.steps {
            lines.push(format!("\nStep {}: {}", step.ordinal, step.query));
            lines.push(format!(
                "Analysis: {}",
                preview(&step.analysis, ANALYSIS_PREVIEW)
            ));
        }
    }

    if let Some(evaluation) = &session.evaluation {
        lines.push(String::new());
        lines.push("EVALUATION:".to_string());
        lines.push(thin);
        lines.push(format!(
            "Overall Score: {:.1}/10",
            evaluation.overall_score()
        ));
        lines.push(format!("Action: {}", evaluation.action.as_str()));
        lines.push(format!("Attempts: {}", session.iterations));
        if !evaluation.reasoning.is_empty() {
            lines.push(format!("Reasoning: {}", evaluation.reasoning));
        }
    }

    lines.push(String::new());
    lines.push(format!("Session ID: {}", session.id));
    lines.push(format!(
        "Completed: {}",
        session.finished_at.format("%Y-%m-%d %H:%M:%S")
    ));
    lines.push(rule);

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use webresearch_core::ProgressStatus;

    fn update(status: ProgressStatus, message: &str) -> ProgressUpdate {
        ProgressUpdate {
            session_id: "s".into(),
            step_number: status.phase(),
            total_steps: 6,
            status,
            message: message.into(),
            timestamp: Default::default(),
        }
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "webresearch",
            "run",
            "What is photosynthesis?",
            "--searches",
            "5",
            "-r",
            "2",
            "--verbose",
        ])
        .expect("arguments parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.question, "What is photosynthesis?");
                assert_eq!(args.searches, Some(5));
                assert_eq!(args.rewordings, Some(2));
                assert!(args.verbose);
                assert_eq!(args.output_dir, PathBuf::from("output"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn json_runs_keep_progress_off_stdout() {
        fn parse(argv: &[&str]) -> RunArgs {
            match Cli::try_parse_from(argv).expect("arguments parse").command {
                Command::Run(args) => args,
                other => panic!("unexpected command {other:?}"),
            }
        }

        let json = parse(&["webresearch", "run", "q", "--json"]);
        assert_eq!(ProgressStream::for_run(&json), ProgressStream::Stderr);

        let text = parse(&["webresearch", "run", "q"]);
        assert_eq!(ProgressStream::for_run(&text), ProgressStream::Stdout);
    }

    #[test]
    fn zero_searches_are_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["webresearch", "run", "q", "--searches", "0"]).is_err());
    }

    #[test]
    fn quiet_progress_prints_once_per_phase() {
        let mut last = None;
        let first = progress_line(&update(ProgressStatus::Searching, "a"), false, &mut last);
        let repeat = progress_line(&update(ProgressStatus::SearchComplete, "b"), false, &mut last);
        let next = progress_line(&update(ProgressStatus::Analyzing, "c"), false, &mut last);

        assert_eq!(first.as_deref(), Some("Step 2/6: searching"));
        assert!(repeat.is_none());
        assert_eq!(next.as_deref(), Some("Step 3/6: analyzing"));
    }

    #[test]
    fn verbose_progress_prints_messages() {
        let mut last = None;
        let line = progress_line(
            &update(ProgressStatus::Verdict, "Attempt 1/3: sufficient"),
            true,
            &mut last,
        )
        .unwrap();
        assert!(line.ends_with("Step 5/6: Attempt 1/3: sufficient"));
    }
}
