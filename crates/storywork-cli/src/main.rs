use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storywork_cli::cmd::{
    self, extract::ExtractArgs, plan::PlanSubcommand, publish::PublishArgs, rewrite::RewriteArgs,
    Global,
};
use storywork_cli::{exit, root};

#[derive(Parser)]
#[command(
    name = "storywork",
    about = "Resumable batches that extract, rewrite and publish GitHub stories",
    version,
    propagate_version = true
)]
struct Cli {
    /// Story tree root (default: auto-detect from plan files or .storywork.yaml)
    #[arg(long, global = true, env = "STORYWORK_ROOT")]
    root: Option<PathBuf>,

    /// Workspace repo with prompts, agents and business rules (default: cwd)
    #[arg(long, global = true, env = "STORYWORK_REPO")]
    repo: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Debug logging and the most frequent errors in the summary
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull open GitHub issues into frontend/<n>/before.md and backend/<n>/backend.md
    Extract(ExtractArgs),

    /// Rewrite frontend stories with the LLM into frontend/<n>/after.md
    Rewrite(RewriteArgs),

    /// Push after.md bodies and proposed labels back to GitHub
    Publish(PublishArgs),

    /// Inspect batch plans
    Plan {
        #[command(subcommand)]
        subcommand: PlanSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let global = Global {
        root: root::resolve_root(cli.root.as_deref()),
        repo: root::resolve_repo(cli.repo.as_deref()),
        json: cli.json,
        verbose: cli.verbose,
    };

    let result = match cli.command {
        Commands::Extract(args) => cmd::extract::run(&global, args),
        Commands::Rewrite(args) => cmd::rewrite::run(&global, args),
        Commands::Publish(args) => cmd::publish::run(&global, args),
        Commands::Plan { subcommand } => cmd::plan::run(&global, subcommand),
    };

    if let Err(e) = result {
        // Every guard (lock, runtime) is dropped by now.
        eprintln!("error: {e:#}");
        std::process::exit(exit::code_for(&e));
    }
}
