use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dex_cache::app::App;
use dex_cache::config::{ConfigLoader, ResolvedConfig};
use dex_cache::domain::{EntityId, Strategy};
use dex_cache::error::DexError;
use dex_cache::output::{JsonOutput, OutputMode, TextOutput};
use dex_cache::species::SpeciesHttpClient;
use dex_cache::store::Store;
use dex_cache::tui::{self, Tui};

#[derive(Parser)]
#[command(name = "dex-cache")]
#[command(about = "Progressively load and cache localized species names")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Refresh the name cache")]
    Load(LoadArgs),
    #[command(about = "List cached names")]
    List(ListArgs),
    #[command(about = "Show one entry")]
    Info(IdArgs),
    #[command(about = "Toggle ownership of an entry")]
    Own(IdArgs),
    #[command(about = "Show cache status")]
    Status,
    #[command(about = "Delete cached names and ownership")]
    Clear,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(long, value_enum, default_value_t = Strategy::Fast)]
    strategy: Strategy,

    /// Bulk-fetch placeholders before the run (useful with ultra)
    #[arg(long)]
    prime: bool,
}

#[derive(Args)]
struct ListArgs {
    /// `#25`, `25`, or part of a name
    #[arg(long)]
    query: Option<String>,

    #[arg(long)]
    owned: bool,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<DexError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DexError) -> u8 {
    match error {
        DexError::InvalidEntityId(_) | DexError::EntityNotFound(_) => 2,
        DexError::ConfigRead(_) | DexError::ConfigParse(_) => 2,
        DexError::SpeciesHttp(_) | DexError::SpeciesStatus { .. } | DexError::Timeout { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(&config)?;

    match cli.command {
        Commands::Load(args) => run_load(args, &app, output_mode),
        Commands::List(args) => {
            let result = app.list(args.query.as_deref(), args.owned);
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_list(&result),
                OutputMode::Interactive => TextOutput::print_list(&result),
            };
            printed.into_diagnostic()
        }
        Commands::Info(args) => {
            let id = args.id.parse::<EntityId>()?;
            let result = app.info(id)?;
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_info(&result),
                OutputMode::Interactive => TextOutput::print_info(&result),
            };
            printed.into_diagnostic()
        }
        Commands::Own(args) => {
            let id = args.id.parse::<EntityId>()?;
            let result = app.toggle_owned(id)?;
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_ownership(&result),
                OutputMode::Interactive => TextOutput::print_ownership(&result),
            };
            printed.into_diagnostic()
        }
        Commands::Status => {
            let result = app.status();
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&result),
                OutputMode::Interactive => TextOutput::print_status(&result),
            };
            printed.into_diagnostic()
        }
        Commands::Clear => run_clear(&app, output_mode),
    }
}

fn build_app(config: &ResolvedConfig) -> Result<App<SpeciesHttpClient>, DexError> {
    let store = match &config.cache_dir {
        Some(dir) => Store::new_with_root(dir.clone()),
        None => Store::new()?,
    };
    let client = SpeciesHttpClient::new(&config.base_url, &config.locale)?;
    Ok(App::new(store, client, config.load.clone()))
}

fn run_load(
    args: LoadArgs,
    app: &App<SpeciesHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if args.prime {
        if let Some(primed) = app.prime()? {
            tracing::info!(
                fetched = primed.fetched,
                entries = primed.entries,
                "primed cache from bulk list"
            );
            if matches!(output_mode, OutputMode::NonInteractive) {
                JsonOutput::print_prime(&primed).into_diagnostic()?;
            }
        }
    }

    let Some(handle) = app.start(args.strategy) else {
        return Err(miette::Report::msg("a refresh run is already active"));
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let report = handle.wait()?;
            JsonOutput::print_run(&report).into_diagnostic()
        }
        OutputMode::Interactive => {
            let report = Tui::new(args.strategy).watch(handle)?;
            TextOutput::print_run(&report).into_diagnostic()
        }
    }
}

fn run_clear(app: &App<SpeciesHttpClient>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.clear()?;
            JsonOutput::print_clear(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            if !tui::confirm_clear()? {
                return Ok(());
            }
            app.clear()?;
            println!("cleared {}", app.store().root());
            Ok(())
        }
    }
}
