//! vault-analytics CLI: ingest, rank, aggregate, audit, export, verify.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use vault_analytics::analytics::{
    achievement_report, build_cohort_analysis, build_time_series, retention_matrix, DisplaySort,
    Interval, Pagination, RiskLevel, ScopeFilter, SeparationFilter, SeriesKind, SortField,
    SortOrder, VaultFilter, VestingFilter,
};
use vault_analytics::chain::{DataSource, EventFilter, RecordedAdapter, TransportConfig};
use vault_analytics::config::protocol::ZERO_ADDRESS;
use vault_analytics::conservation::{calculate_conservation, fold_ghost_variables};
use vault_analytics::events::DormancyState;
use vault_analytics::indexer::{Indexer, IndexerConfig, SchemaPolicy};
use vault_analytics::verify::verify_export;
use vault_analytics::{ChainRegistry, ClientConfig, IndexedEvent, VaultClient, VaultQuery};
use vault_analytics_report::{export, write_export, ExportFormat, Report};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Ingest(args) => run_ingest(args),
        Command::Rank(args) => run_rank(args),
        Command::Health(args) => run_health(args),
        Command::Distribution(args) => run_distribution(args),
        Command::Series(args) => run_series(args),
        Command::Cohorts(args) => run_cohorts(args),
        Command::Risks(args) => run_risks(args),
        Command::Achievements(args) => run_achievements(args),
        Command::Conservation(args) => run_conservation(args),
        Command::Verify(args) => run_verify(args),
    }
}

#[derive(Parser)]
#[command(name = "vault-analytics")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Indexing, ranking and conservation auditing for collateral vaults")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the event log from a chain or a recorded file and write it as JSON.
    Ingest(IngestArgs),
    /// Rank vaults by collateral within a scope.
    Rank(RankArgs),
    /// Ecosystem health summary.
    Health(CommonArgs),
    /// Portfolio stats with tier, vesting and dormancy distributions.
    Distribution(QueryArgs),
    /// Growth, withdrawal or redemption time series.
    Series(SeriesArgs),
    /// Monthly cohort analysis or the retention matrix.
    Cohorts(CohortArgs),
    /// Vaults approaching dormancy.
    Risks(RiskArgs),
    /// Achievement distribution and funnel.
    Achievements(CommonArgs),
    /// Cross-ledger conservation check over the full event log.
    Conservation(ConservationArgs),
    /// Recompute the digest of a JSON export.
    Verify(VerifyArgs),
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long, default_value_t = 1)]
    chain: u64,
    /// Replay a recorded event file instead of querying the chain.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "./data/cache")]
    cache_dir: PathBuf,
    #[arg(long)]
    offline: bool,
    /// Unix seconds or RFC 3339. Defaults to the wall clock.
    #[arg(long)]
    now: Option<String>,
    #[arg(long, default_value = "json")]
    format: ExportFormat,
    /// Write here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Restrict to vaults minted through this issuer.
    #[arg(long, conflicts_with = "treasure")]
    issuer: Option<String>,
    /// Restrict to vaults holding this treasure contract.
    #[arg(long)]
    treasure: Option<String>,
    #[arg(long)]
    vesting: Option<VestingFilter>,
    #[arg(long)]
    separation: Option<SeparationFilter>,
    /// Dormancy states to keep; repeatable.
    #[arg(long)]
    dormancy: Vec<DormancyState>,
}

impl QueryArgs {
    fn query(&self) -> VaultQuery {
        let scope = match (&self.issuer, &self.treasure) {
            (Some(a), _) => ScopeFilter::Issuer(a.clone()),
            (None, Some(a)) => ScopeFilter::Treasure(a.clone()),
            (None, None) => ScopeFilter::All,
        };
        VaultQuery {
            scope,
            filter: VaultFilter {
                vesting: self.vesting,
                separation: self.separation,
                dormancy: self.dormancy.clone(),
            },
            ..Default::default()
        }
    }
}

#[derive(Args)]
struct IngestArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    to_block: Option<u64>,
    #[arg(long, default_value_t = 5_000)]
    block_span: u64,
    /// Fail on the first record that does not validate.
    #[arg(long)]
    strict_schema: bool,
}

#[derive(Args)]
struct RankArgs {
    #[command(flatten)]
    query: QueryArgs,
    #[arg(long, default_value = "collateral")]
    sort_by: SortField,
    #[arg(long, default_value = "desc")]
    order: SortOrder,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 50)]
    page_size: usize,
}

#[derive(Args)]
struct SeriesArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value = "growth")]
    kind: SeriesKind,
    #[arg(long, default_value = "day")]
    interval: Interval,
    /// Moving average over this many buckets.
    #[arg(long)]
    window: Option<usize>,
}

#[derive(Args)]
struct CohortArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Emit the month-by-month retention matrix instead of the summary.
    #[arg(long)]
    retention: bool,
}

#[derive(Args)]
struct RiskArgs {
    #[command(flatten)]
    query: QueryArgs,
    #[arg(long, default_value = "MEDIUM")]
    min_level: RiskLevel,
}

#[derive(Args)]
struct ConservationArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Exit 1 when any ledger is unbalanced.
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long)]
    file: PathBuf,
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn resolve_now(raw: Option<&str>) -> CliResult<u64> {
    let ts = match raw {
        None => OffsetDateTime::now_utc().unix_timestamp(),
        Some(s) => match s.trim().parse::<u64>() {
            Ok(secs) => return Ok(secs),
            Err(_) => OffsetDateTime::parse(s.trim(), &Rfc3339)?.unix_timestamp(),
        },
    };
    Ok(u64::try_from(ts).unwrap_or(0))
}

/// Recorded file when `--events` is given, otherwise the chain's backend.
fn build_client(args: &CommonArgs, registry: &ChainRegistry) -> CliResult<VaultClient> {
    if let Some(path) = &args.events {
        let denomination = registry
            .get(args.chain)
            .map(|c| c.default_collateral_token())
            .unwrap_or_else(|_| ZERO_ADDRESS.to_string());
        let adapter = RecordedAdapter::open(path, denomination.clone())?;
        return Ok(VaultClient::with_source(DataSource::Recorded(adapter))
            .with_default_denomination(denomination));
    }
    let config = ClientConfig {
        cache_dir: Some(args.cache_dir.clone()),
        transport: TransportConfig {
            offline: args.offline,
            ..Default::default()
        },
        ..ClientConfig::for_chain(args.chain)
    };
    std::fs::create_dir_all(&args.cache_dir)?;
    Ok(VaultClient::new(config, registry)?)
}

fn emit(report: &Report, args: &CommonArgs) -> CliResult {
    match &args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            write_export(report, args.format, path)?;
            info!(kind = report.kind(), path = %path.display(), format = args.format.extension(), "export written");
        }
        None => {
            use std::io::Write;
            let bytes = export(report, args.format)?;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

fn all_events(rt: &tokio::runtime::Runtime, client: &VaultClient) -> CliResult<Vec<IndexedEvent>> {
    let events = rt.block_on(client.fetch_events(&EventFilter::default()))?;
    info!(count = events.len(), backend = %client.source().backend(), "loaded events");
    Ok(events)
}

fn run_ingest(args: IngestArgs) -> CliResult {
    let registry = ChainRegistry::load();
    let client = build_client(&args.common, &registry)?;
    let start_block = match &args.common.events {
        Some(_) => 0,
        None => registry.get(args.common.chain)?.deployment_block,
    };
    let indexer = Indexer::new(IndexerConfig {
        start_block,
        block_span: args.block_span,
        schema_policy: if args.strict_schema {
            SchemaPolicy::Abort
        } else {
            SchemaPolicy::Skip
        },
        ..Default::default()
    });
    let rt = runtime()?;
    let report = rt.block_on(indexer.ingest(client.source(), args.to_block))?;
    info!(
        from = report.from_block,
        to = report.to_block,
        ranges = report.ranges,
        appended = report.outcome.appended,
        duplicates = report.outcome.duplicates,
        rejected = report.rejected.len(),
        "ingest complete"
    );
    emit(&Report::Events(indexer.snapshot().to_vec()), &args.common)
}

fn run_rank(args: RankArgs) -> CliResult {
    let common = &args.query.common;
    let client = build_client(common, &ChainRegistry::load())?;
    let now = resolve_now(common.now.as_deref())?;
    let query = VaultQuery {
        sort: DisplaySort {
            field: args.sort_by,
            order: args.order,
        },
        pagination: Pagination {
            page: args.page,
            page_size: args.page_size,
        },
        ..args.query.query()
    };
    let rt = runtime()?;
    let result = rt.block_on(client.get_vaults(&query, now))?;
    if result.insufficient_sample {
        warn!(total = result.total, "population below minimum sample, tiers withheld");
    }
    emit(&Report::Ranked(result), common)
}

fn run_health(args: CommonArgs) -> CliResult {
    let client = build_client(&args, &ChainRegistry::load())?;
    let now = resolve_now(args.now.as_deref())?;
    let health = runtime()?.block_on(client.get_ecosystem_health(now))?;
    emit(&Report::Health(health), &args)
}

fn run_distribution(args: QueryArgs) -> CliResult {
    let client = build_client(&args.common, &ChainRegistry::load())?;
    let now = resolve_now(args.common.now.as_deref())?;
    let report = runtime()?.block_on(client.get_distribution(&args.query(), now))?;
    emit(&Report::Distribution(report), &args.common)
}

fn run_series(args: SeriesArgs) -> CliResult {
    let client = build_client(&args.common, &ChainRegistry::load())?;
    let events = all_events(&runtime()?, &client)?;
    let mut series = build_time_series(&events, args.kind, args.interval);
    if let Some(window) = args.window {
        series = series.with_moving_average(window);
    }
    emit(&Report::Series(series), &args.common)
}

fn run_cohorts(args: CohortArgs) -> CliResult {
    let client = build_client(&args.common, &ChainRegistry::load())?;
    let events = all_events(&runtime()?, &client)?;
    let report = if args.retention {
        let now = resolve_now(args.common.now.as_deref())?;
        Report::Retention(retention_matrix(&events, now))
    } else {
        Report::Cohorts(build_cohort_analysis(&events))
    };
    emit(&report, &args.common)
}

fn run_risks(args: RiskArgs) -> CliResult {
    let common = &args.query.common;
    let client = build_client(common, &ChainRegistry::load())?;
    let now = resolve_now(common.now.as_deref())?;
    let risks = runtime()?.block_on(client.get_dormancy_risks(&args.query.query(), args.min_level, now))?;
    emit(&Report::Risks(risks), common)
}

fn run_achievements(args: CommonArgs) -> CliResult {
    let client = build_client(&args, &ChainRegistry::load())?;
    let events = all_events(&runtime()?, &client)?;
    emit(&Report::Achievements(achievement_report(&events)?), &args)
}

fn run_conservation(args: ConservationArgs) -> CliResult {
    let client = build_client(&args.common, &ChainRegistry::load())?;
    let events = all_events(&runtime()?, &client)?;
    let ghosts = fold_ghost_variables(&events, client.default_denomination());
    let report = calculate_conservation(&ghosts);
    for v in &report.violations {
        warn!(ledger = %v.ledger, discrepancy = %v.discrepancy, detail = %v.detail, "conservation violated");
    }
    let balanced = report.balanced;
    emit(&Report::Conservation(report), &args.common)?;
    if args.strict && !balanced {
        std::process::exit(1);
    }
    Ok(())
}

fn run_verify(args: VerifyArgs) -> CliResult {
    let bytes = std::fs::read(&args.file)?;
    let result = verify_export(&bytes)?;
    if result.matches {
        println!("OK\t{}", result.digest);
    } else {
        eprintln!(
            "MISMATCH\tkind={}\tcomputed={}\texpected={}",
            result.kind, result.digest, result.expected
        );
        std::process::exit(1);
    }
    Ok(())
}
