use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell as CompShell};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

use volley::commands::{run, validate};
use volley::performance::runner::EXIT_SETUP_ERROR;

#[derive(Parser)]
#[command(name = "volley")]
#[command(version = "0.1.0")]
#[command(about = "Ramping gRPC load runs with pass/fail thresholds")]
#[command(long_about = None)]
struct Cli {
    /// Verbose logging to stderr (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load configuration and judge it against its thresholds
    Run {
        /// Run configuration (YAML)
        config: PathBuf,
        /// Override the target endpoint
        #[arg(long = "endpoint")]
        endpoint: Option<String>,
        /// Extra call metadata in format "key: value"
        #[arg(short = 'H', long = "metadata", action = clap::ArgAction::Append)]
        metadata: Vec<String>,
        /// Seed for reproducible payloads
        #[arg(long = "seed")]
        seed: Option<u64>,
        /// Scheduler tick (e.g. "1s", "250ms")
        #[arg(long = "tick")]
        tick: Option<String>,
        /// Progress report interval in CI mode
        #[arg(long = "report-interval", default_value = "5s")]
        report_interval: String,
        /// Write a JSON run report to this file
        #[arg(long = "output")]
        output: Option<PathBuf>,
        /// CI mode (no animations)
        #[arg(long = "ci")]
        ci: bool,
    },
    /// Check a run configuration without generating load
    Validate {
        /// Run configuration (YAML)
        config: PathBuf,
    },
    /// Generate shell completions (internal)
    #[command(hide = true)]
    Completions {
        /// Shell: bash, zsh, fish
        shell: String,
    },
    /// Generate man page (internal)
    #[command(hide = true)]
    Man,
}

pub fn print_banner() {
    let banner = r#"
    ╦  ╦╔═╗╦  ╦  ╔═╗╦ ╦
    ╚╗╔╝║ ║║  ║  ║╣ ╚╦╝   volley v0.1.0
     ╚╝ ╚═╝╩═╝╩═╝╚═╝ ╩    ramping load with verdicts
"#;

    if atty::is(atty::Stream::Stdout) {
        println!("{}", banner.cyan());
    } else {
        println!("volley v0.1.0 - ramping load with verdicts");
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "volley=debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if matches!(cli.command, Commands::Run { .. }) {
        print_banner();
    }

    let outcome = match cli.command {
        Commands::Run {
            config,
            endpoint,
            metadata,
            seed,
            tick,
            report_interval,
            output,
            ci,
        } => {
            run::handle_run(run::RunOptions {
                config,
                endpoint,
                metadata,
                seed,
                tick,
                report_interval,
                output,
                ci,
            })
            .await
        }
        Commands::Validate { config } => validate::handle_validate(config).await.map(|()| 0),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            let sh = match shell.as_str() {
                "bash" => CompShell::Bash,
                "zsh" => CompShell::Zsh,
                "fish" => CompShell::Fish,
                "powershell" | "pwsh" => CompShell::PowerShell,
                "elvish" => CompShell::Elvish,
                other => {
                    eprintln!(
                        "Unsupported shell: {} (use bash|zsh|fish|powershell|elvish)",
                        other
                    );
                    return ExitCode::from(2);
                }
            };
            generate(sh, &mut cmd, name, &mut std::io::stdout());
            Ok(0)
        }
        Commands::Man => {
            let man = clap_mangen::Man::new(Cli::command());
            man.render(&mut std::io::stdout())
                .map(|()| 0)
                .map_err(anyhow::Error::from)
        }
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "✖".red().bold(), e);
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}
