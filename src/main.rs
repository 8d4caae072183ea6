//! testlens CLI - Normalizes test framework output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testlens::config::{self, Config, FrameworkConfig};
use testlens::framework::ReportSource;
use testlens::report::{Summary, print_summary};

#[derive(Parser)]
#[command(name = "testlens")]
#[command(about = "Turns test framework output into a canonical test tree and results", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testlens.toml")]
    config: PathBuf,

    /// Working directory of the test run (overrides the configuration)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse discovery output and print the test tree as JSON
    Discover {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Parse run output and print result events as JSON
    Results {
        #[command(flatten)]
        input: InputArgs,

        /// Don't print the summary to stderr
        #[arg(long)]
        quiet: bool,
    },

    /// Validate configuration file
    Validate,
}

#[derive(clap::Args)]
struct InputArgs {
    /// Output file, report file or report directory; `-` reads stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// How to treat the input (inferred from the path when omitted)
    #[arg(short, long, value_enum)]
    kind: Option<InputKind>,
}

#[derive(Clone, Copy, ValueEnum)]
enum InputKind {
    /// Captured text, read up front
    Text,
    /// A single report file
    File,
    /// A directory of report files
    Dir,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so that stdout stays valid JSON
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Discover { input } => discover(&cli, input).await,
        Commands::Results { input, quiet } => results(&cli, input, *quiet).await,
        Commands::Validate => validate_config(&cli.config),
    }
}

fn load(cli: &Cli) -> Result<(Config, PathBuf)> {
    let config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    info!("Loaded configuration from {}", cli.config.display());

    let mut settings = config.settings.clone();
    if let Some(cwd) = &cli.cwd {
        settings.cwd = Some(cwd.clone());
    }
    let cwd = settings
        .resolve_cwd()
        .context("Failed to determine the working directory")?;

    Ok((config, cwd))
}

async fn read_source(input: &InputArgs) -> Result<ReportSource> {
    if input.input == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        return Ok(ReportSource::Text(text));
    }

    let path = PathBuf::from(&input.input);
    let kind = match input.kind {
        Some(kind) => kind,
        None if path.is_dir() => InputKind::Dir,
        None => InputKind::File,
    };

    Ok(match kind {
        InputKind::Text => ReportSource::Text(
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        InputKind::File => ReportSource::File(path),
        InputKind::Dir => ReportSource::Directory(path),
    })
}

async fn discover(cli: &Cli, input: &InputArgs) -> Result<()> {
    let (config, cwd) = load(cli)?;
    let source = read_source(input).await?;
    let parser = config.framework.parser();

    match parser.discover(&source, &cwd).await {
        Some(tree) => {
            info!("Discovered {} tests", tree.test_count());
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        None => {
            eprintln!("No tests found");
            println!("null");
        }
    }

    Ok(())
}

async fn results(cli: &Cli, input: &InputArgs, quiet: bool) -> Result<()> {
    let (config, cwd) = load(cli)?;
    let source = read_source(input).await?;
    let parser = config.framework.parser();

    let events = parser.results(&source, &cwd).await;
    println!("{}", serde_json::to_string_pretty(&events)?);

    if !quiet {
        print_summary(&Summary::from_events(&events));
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            match &config.settings.cwd {
                Some(cwd) => println!("  Working directory: {}", cwd.display()),
                None => println!("  Working directory: (current directory)"),
            }
            println!("  Framework: {}", config.framework.parser().name());
            match &config.framework {
                FrameworkConfig::Pytest(pytest) => {
                    println!("  JUnit ids: {:?}", pytest.junit_id);
                    println!("  Extension segment: {}", pytest.extension_segment);
                }
                FrameworkConfig::Testplan(testplan) => {
                    println!("  Listing: {:?}", testplan.listing);
                }
                FrameworkConfig::Unittest | FrameworkConfig::Behave => {}
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
