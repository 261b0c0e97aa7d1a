use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rcs2_stamps::app::{App, FetchOptions, ProgressSink, TargetStatus};
use rcs2_stamps::batch::read_targets;
use rcs2_stamps::config::{ConfigLoader, ConfigOverrides};
use rcs2_stamps::domain::{ChipId, Filter};
use rcs2_stamps::error::StampError;
use rcs2_stamps::output::{HumanOutput, JsonOutput, OutputMode};
use rcs2_stamps::query::{QueryMode, RegionQuery};
use rcs2_stamps::unpack::FunpackUnpacker;

#[derive(Parser)]
#[command(name = "rcs2-stamps")]
#[command(about = "Find the RCS-2 chips covering a position and unpack their image stamps")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./rcs2-stamps.json when present)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PathArgs {
    /// Chip catalog table (PATCH, CHIP, RAMIN, RAMAX, DECMIN, DECMAX)
    #[arg(long, global = true)]
    catalog: Option<Utf8PathBuf>,

    /// Root of the packed image archive
    #[arg(long, global = true)]
    images: Option<Utf8PathBuf>,

    /// Root of the header archive
    #[arg(long, global = true)]
    headers: Option<Utf8PathBuf>,

    /// Output directory
    #[arg(long, global = true)]
    out: Option<Utf8PathBuf>,

    /// Filters to fetch, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    filters: Option<Vec<Filter>>,

    /// Parallel unpack workers
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Per-stamp unpack timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// List the chips covering a position
    Find(PositionArgs),
    /// Unpack the stamps of the chips covering a position
    Fetch(FetchArgs),
    /// Fetch stamps for every target of a CSV candidate list
    Batch(BatchArgs),
}

#[derive(Args)]
struct PositionArgs {
    /// Right ascension in degrees (J2000)
    #[arg(allow_negative_numbers = true)]
    ra: f64,

    /// Declination in degrees (J2000)
    #[arg(allow_negative_numbers = true)]
    dec: f64,

    /// Full field size in arcminutes
    size: f64,

    /// Only chips whose box contains the center
    #[arg(long)]
    exact_only: bool,
}

#[derive(Args)]
struct FetchArgs {
    /// Right ascension in degrees (J2000)
    #[arg(allow_negative_numbers = true, required_unless_present = "pointing")]
    ra: Option<f64>,

    /// Declination in degrees (J2000)
    #[arg(allow_negative_numbers = true, required_unless_present = "pointing")]
    dec: Option<f64>,

    /// Full field size in arcminutes
    #[arg(required_unless_present = "pointing")]
    size: Option<f64>,

    /// Only chips whose box contains the center
    #[arg(long)]
    exact_only: bool,

    /// Fetch this chip directly, e.g. 0047A0:00 (repeatable)
    #[arg(long, conflicts_with_all = ["ra", "dec", "size", "exact_only"])]
    pointing: Vec<String>,

    /// Plan only, do not unpack
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct BatchArgs {
    /// CSV with Name, RA_deg, DEC_deg, Aperture_arcsec
    targets: Utf8PathBuf,

    /// Only chips whose box contains the center
    #[arg(long)]
    exact_only: bool,

    /// Plan only, do not unpack
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<StampError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &StampError) -> u8 {
    match error {
        StampError::NoChipsFound { .. }
        | StampError::InvalidQuery(_)
        | StampError::InvalidPointing(_)
        | StampError::InvalidFilter(_) => 2,
        StampError::MissingTool(_) | StampError::Unpack(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).into_diagnostic()?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?.apply(ConfigOverrides {
        catalog: cli.paths.catalog,
        images_root: cli.paths.images,
        headers_root: cli.paths.headers,
        out_dir: cli.paths.out,
        filters: cli.paths.filters,
        unpack_timeout_secs: cli.paths.timeout_secs,
        jobs: cli.paths.jobs,
    })?;
    let unpacker = FunpackUnpacker::new(&config.unpack_program, config.unpack_timeout)
        .with_leading_args(config.unpack_args.clone());
    let will_unpack = match &cli.command {
        Command::Find(_) => false,
        Command::Fetch(args) => !args.dry_run,
        Command::Batch(args) => !args.dry_run,
    };
    if will_unpack {
        require_tool(&unpacker)?;
    }
    let app = App::new(config, unpacker)?;

    match cli.command {
        Command::Find(args) => run_find(&app, args, output_mode),
        Command::Fetch(args) => run_fetch(&app, args, output_mode),
        Command::Batch(args) => run_batch(&app, args, output_mode),
    }
}

/// Fails before any work when the unpack program is not installed.
fn require_tool(unpacker: &FunpackUnpacker) -> Result<(), StampError> {
    let tool = unpacker.tool_info();
    tracing::debug!(
        program = %tool.program,
        resolved = ?tool.resolved,
        version = ?tool.version,
        timeout_secs = unpacker.timeout().as_secs(),
        "unpack tool"
    );
    match tool.resolved {
        Some(_) => Ok(()),
        None => Err(StampError::MissingTool(tool.program)),
    }
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Human => &HumanOutput,
        OutputMode::Json => &JsonOutput,
    }
}

fn query_mode(exact_only: bool) -> QueryMode {
    if exact_only {
        QueryMode::ContainsCenter
    } else {
        QueryMode::OverlapsWindow
    }
}

fn run_find(
    app: &App<FunpackUnpacker>,
    args: PositionArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink = sink_for(output_mode);
    let catalog = app.load_catalog(sink)?;
    let query =
        RegionQuery::from_field_size(args.ra, args.dec, args.size, query_mode(args.exact_only));
    let result = app.find(&catalog, query, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_find(&result).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_find(&result),
    }
    if result.is_empty() {
        return Err(StampError::NoChipsFound {
            ra: args.ra,
            dec: args.dec,
        }
        .into());
    }
    Ok(())
}

fn run_fetch(
    app: &App<FunpackUnpacker>,
    args: FetchArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink = sink_for(output_mode);
    let options = FetchOptions {
        dry_run: args.dry_run,
    };

    let (chips, query) = if args.pointing.is_empty() {
        let (Some(ra), Some(dec), Some(size)) = (args.ra, args.dec, args.size) else {
            return Err(StampError::InvalidQuery(
                "RA, Dec and size are required without --pointing".to_string(),
            )
            .into());
        };
        let catalog = app.load_catalog(sink)?;
        let query = RegionQuery::from_field_size(ra, dec, size, query_mode(args.exact_only));
        let found = app.find(&catalog, query, sink)?;
        if found.is_empty() {
            return Err(StampError::NoChipsFound { ra, dec }.into());
        }
        (found.chip_ids(), Some(query))
    } else {
        let chips = args
            .pointing
            .iter()
            .map(|value| value.parse::<ChipId>())
            .collect::<Result<Vec<_>, _>>()?;
        (chips, None)
    };

    let layout = app.config().layout.clone();
    let result = app.fetch(&chips, query, &layout, options, sink)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_fetch(&result).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_fetch(&result),
    }

    if !result.dry_run && result.summary.total > 0 && result.summary.images_staged() == 0 {
        return Err(StampError::Unpack("no stamp could be unpacked".to_string()).into());
    }
    Ok(())
}

fn run_batch(
    app: &App<FunpackUnpacker>,
    args: BatchArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink = sink_for(output_mode);
    let targets = read_targets(&args.targets)?;
    let catalog = app.load_catalog(sink)?;
    let options = FetchOptions {
        dry_run: args.dry_run,
    };
    let result = app.batch(
        &catalog,
        &targets,
        query_mode(args.exact_only),
        options,
        sink,
    );

    match output_mode {
        OutputMode::Json => JsonOutput::print_batch(&result).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_batch(&result),
    }

    let fetched = result
        .targets
        .iter()
        .filter(|target| matches!(target.status, TargetStatus::Fetched { .. }))
        .count();
    if !result.targets.is_empty() && fetched == 0 {
        return Err(miette::Report::msg(
            "no target produced any stamps (see the per-target report above)",
        ));
    }
    Ok(())
}
