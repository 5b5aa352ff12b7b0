//! StratDesk CLI: local verification plus remote backtest and trading commands.
//!
//! Commands:
//! - `health`: check the backtest, trading, and position services
//! - `verify`: run the strategy selector on a local price CSV and show weights
//! - `allocate`: validate a config bundle and show its weight allocation
//! - `upload` / `check` / `delete`: manage remote strategy and config files
//! - `backtest`: run a remote backtest and save the HTML report
//! - `trade run | monitor | terminate`: live session lifecycle
//! - `positions`: list open positions for the account

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use stratdesk_core::{
    builtin_selector, preflight, preflight_static, CandidateSet, ConfigBundle, Preflight,
    PriceFrame, Session, SessionMode, TradeType, WeightAllocation,
};
use stratdesk_runner::{
    load_dotenv, Artifact, ArtifactKind, BacktestRequest, Credentials, EndpointConfig,
    HealthStatus, HttpEngine, LogMonitor, MonitorExit, MonitorSummary, PositionReconciler,
    PositionSnapshot, ReconcileReport, RemoteEngine, Service, SessionController, SessionStore,
    Submission, TerminateOutcome,
};

#[derive(Parser)]
#[command(
    name = "stratdesk",
    about = "StratDesk: validate, backtest, and run rebalancing strategies on a remote engine"
)]
struct Cli {
    /// `.env` file with USER_KEY and DATA_API_KEY. Defaults to ./.env.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// TOML file with an `[endpoints]` section overriding service URLs.
    #[arg(long, global = true)]
    endpoints: Option<PathBuf>,

    /// Directory for live session records.
    #[arg(long, global = true, default_value = "sessions")]
    sessions_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that each remote service answers.
    Health,
    /// Run the strategy selector on local prices and show candidates and weights.
    Verify {
        /// Config bundle (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Minute close prices: `datetime,SYM1,SYM2,...`.
        #[arg(long)]
        prices: PathBuf,
    },
    /// Validate a config bundle and show its weight allocation.
    Allocate {
        /// Config bundle (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Long candidates (split weighting only).
        #[arg(long, value_delimiter = ',')]
        long: Vec<String>,

        /// Short candidates (split weighting only).
        #[arg(long, value_delimiter = ',')]
        short: Vec<String>,
    },
    /// Upload a strategy or config file.
    Upload {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = KindArg::Strategy)]
        kind: KindArg,

        #[arg(long, value_enum, default_value_t = ServiceArg::Trading)]
        service: ServiceArg,

        /// Required by the backtest service.
        #[arg(long, value_enum)]
        trade_type: Option<TradeTypeArg>,
    },
    /// Show whether a strategy is present on a service.
    Check {
        name: String,

        #[arg(long, value_enum, default_value_t = ServiceArg::Trading)]
        service: ServiceArg,

        #[arg(long, value_enum)]
        trade_type: Option<TradeTypeArg>,
    },
    /// Delete a remote strategy or config.
    Delete {
        name: String,

        #[arg(long, value_enum, default_value_t = KindArg::Strategy)]
        kind: KindArg,

        #[arg(long, value_enum, default_value_t = ServiceArg::Trading)]
        service: ServiceArg,

        #[arg(long, value_enum)]
        trade_type: Option<TradeTypeArg>,
    },
    /// Upload a strategy and run a backtest to completion.
    Backtest {
        /// Config bundle with a `[backtest]` section.
        #[arg(long)]
        config: PathBuf,

        /// Strategy source file.
        #[arg(long)]
        strategy: PathBuf,

        /// Report directory. Defaults to the bundle's `report_dir`.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Live trading session commands.
    Trade {
        #[command(subcommand)]
        action: TradeAction,
    },
    /// List open positions for the account.
    Positions {
        #[arg(long, default_value = "susdt-futures")]
        product_type: String,

        #[arg(long, default_value = "susdt")]
        margin_coin: String,
    },
}

#[derive(Subcommand)]
enum TradeAction {
    /// Validate, upload, and start a live session.
    Run {
        /// Config bundle (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Strategy source file.
        #[arg(long)]
        strategy: PathBuf,

        /// Strategy config file (`{name}_config.py`).
        #[arg(long)]
        strategy_config: Option<PathBuf>,

        /// Local prices to verify candidates before submitting (required for split).
        #[arg(long)]
        prices: Option<PathBuf>,

        /// Run method sent with the run command.
        #[arg(long, default_value = stratdesk_runner::DEFAULT_RUN_METHOD)]
        method: String,
    },
    /// Follow a live session's logs.
    Monitor {
        session_id: String,

        /// Log offset to start from.
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Stop when a log line equals this marker.
        #[arg(long)]
        marker: Option<String>,

        /// Stop after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        #[arg(long, default_value_t = 2)]
        interval_secs: u64,
    },
    /// Stop a live session, then confirm no positions remain.
    Terminate {
        session_id: String,

        /// Skip the position check after termination.
        #[arg(long, default_value_t = false)]
        no_reconcile: bool,

        #[arg(long, default_value = "susdt-futures")]
        product_type: String,

        #[arg(long, default_value = "susdt")]
        margin_coin: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ServiceArg {
    Backtest,
    Trading,
    Position,
}

impl From<ServiceArg> for Service {
    fn from(arg: ServiceArg) -> Self {
        match arg {
            ServiceArg::Backtest => Service::Backtest,
            ServiceArg::Trading => Service::Trading,
            ServiceArg::Position => Service::Position,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Strategy,
    Config,
}

impl From<KindArg> for ArtifactKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Strategy => ArtifactKind::Strategy,
            KindArg::Config => ArtifactKind::Config,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TradeTypeArg {
    Future,
    Spot,
}

impl From<TradeTypeArg> for TradeType {
    fn from(arg: TradeTypeArg) -> Self {
        match arg {
            TradeTypeArg::Future => TradeType::Future,
            TradeTypeArg::Spot => TradeType::Spot,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let connect = || Remote::connect(cli.env_file.as_deref(), cli.endpoints.as_deref());
    let store = SessionStore::new(&cli.sessions_dir);

    match cli.command {
        Commands::Verify { config, prices } => run_verify(&config, &prices),
        Commands::Allocate {
            config,
            long,
            short,
        } => run_allocate(&config, long, short),
        Commands::Health => run_health(&connect()?.engine),
        Commands::Upload {
            file,
            kind,
            service,
            trade_type,
        } => run_upload(&connect()?, &file, kind.into(), service.into(), trade_type),
        Commands::Check {
            name,
            service,
            trade_type,
        } => {
            let ctx = connect()?;
            let controller = SessionController::new(&ctx.engine);
            let reply = controller.check(service.into(), &name, trade_type.map(Into::into))?;
            println!("{}", reply.message_text());
            Ok(())
        }
        Commands::Delete {
            name,
            kind,
            service,
            trade_type,
        } => {
            let ctx = connect()?;
            let mut controller = SessionController::new(&ctx.engine);
            let reply =
                controller.delete(service.into(), kind.into(), &name, trade_type.map(Into::into))?;
            if !reply.accepted() {
                bail!("delete of {name} rejected: {}", reply.message_text());
            }
            println!("Deleted {name}");
            Ok(())
        }
        Commands::Backtest {
            config,
            strategy,
            report_dir,
        } => run_backtest(&connect()?, &config, &strategy, report_dir),
        Commands::Trade { action } => match action {
            TradeAction::Run {
                config,
                strategy,
                strategy_config,
                prices,
                method,
            } => run_trade(
                &connect()?,
                &store,
                &config,
                &strategy,
                strategy_config.as_deref(),
                prices.as_deref(),
                method,
            ),
            TradeAction::Monitor {
                session_id,
                offset,
                marker,
                deadline_secs,
                interval_secs,
            } => {
                let mut monitor = LogMonitor::new(Duration::from_secs(interval_secs));
                if let Some(marker) = marker {
                    monitor = monitor.with_marker(marker);
                }
                if let Some(secs) = deadline_secs {
                    monitor = monitor.with_deadline(Duration::from_secs(secs));
                }
                run_monitor(&connect()?, &store, &session_id, &monitor, offset)
            }
            TradeAction::Terminate {
                session_id,
                no_reconcile,
                product_type,
                margin_coin,
            } => {
                let ctx = connect()?;
                let account =
                    (!no_reconcile).then_some((product_type.as_str(), margin_coin.as_str()));
                run_terminate(&ctx, &store, &session_id, account)
            }
        },
        Commands::Positions {
            product_type,
            margin_coin,
        } => {
            let ctx = connect()?;
            let positions = PositionReconciler::new(&ctx.engine).confirm(
                ctx.credentials.user_key.expose(),
                &product_type,
                &margin_coin,
            )?;
            print_positions(&positions);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

// ─── Local commands ──────────────────────────────────────────────────

fn run_verify(config_path: &Path, prices_path: &Path) -> Result<()> {
    let bundle = ConfigBundle::from_file(config_path)?;
    let Some(selector) = builtin_selector(&bundle.system.strategy_name) else {
        bail!(
            "no local selector for strategy '{}'; only built-in strategies can be verified",
            bundle.system.strategy_name
        );
    };
    let prices = PriceFrame::from_csv_path(prices_path)?;
    let checked = preflight(&bundle, selector.as_ref(), &prices)?;

    println!();
    println!("=== Verification ===");
    println!("Strategy:       {}", checked.config.strategy_name);
    if let Some(ts) = prices.last_timestamp() {
        println!("As of:          {ts}");
    }
    println!("Rows:           {}", prices.len());
    println!("Longs:          {}", join_or_dash(checked.candidates.longs()));
    println!("Shorts:         {}", join_or_dash(checked.candidates.shorts()));
    print_allocation(&checked.allocation);
    Ok(())
}

fn run_allocate(config_path: &Path, long: Vec<String>, short: Vec<String>) -> Result<()> {
    let bundle = ConfigBundle::from_file(config_path)?;
    let allocation = if long.is_empty() && short.is_empty() {
        preflight_static(&bundle)?.allocation
    } else {
        let config = bundle.validate()?;
        let candidates = CandidateSet::new(long, short, config.universe())?;
        config.allocate_for(&candidates)?
    };
    print_allocation(&allocation);
    Ok(())
}

// ─── Remote commands ─────────────────────────────────────────────────

struct Remote {
    engine: HttpEngine,
    credentials: Credentials,
}

impl Remote {
    fn connect(env_file: Option<&Path>, endpoints: Option<&Path>) -> Result<Self> {
        load_dotenv(env_file)?;
        let credentials = Credentials::from_env()?;
        let endpoints = match endpoints {
            Some(path) => EndpointConfig::from_file(path)?,
            None => EndpointConfig::default(),
        };
        let engine = HttpEngine::new(endpoints, credentials.clone())?;
        Ok(Self {
            engine,
            credentials,
        })
    }
}

fn run_upload(
    ctx: &Remote,
    file: &Path,
    kind: ArtifactKind,
    service: Service,
    trade_type: Option<TradeTypeArg>,
) -> Result<()> {
    let artifact =
        Artifact::from_path(file, kind).with_context(|| format!("reading {}", file.display()))?;
    let reply = ctx
        .engine
        .upload_artifact(service, &artifact, trade_type.map(Into::into))?;
    if !reply.accepted() {
        bail!("upload of {} rejected: {}", artifact.file_name, reply.message_text());
    }
    println!("Uploaded {} ({})", artifact.file_name, artifact.short_digest());
    Ok(())
}

fn run_health(engine: &HttpEngine) -> Result<()> {
    let status = engine.health();
    let mark = |up: bool| if up { "up" } else { "DOWN" };
    println!("Backtest:       {}", mark(status.backtest));
    println!("Trading:        {}", mark(status.trading));
    println!("Position:       {}", mark(status.position));
    require_all_up(&status)
}

fn require_all_up(status: &HealthStatus) -> Result<()> {
    let down: Vec<&str> = [
        ("backtest", status.backtest),
        ("trading", status.trading),
        ("position", status.position),
    ]
    .into_iter()
    .filter(|(_, up)| !up)
    .map(|(name, _)| name)
    .collect();
    if !down.is_empty() {
        bail!("unreachable service(s): {}", down.join(", "));
    }
    Ok(())
}

fn run_backtest(
    ctx: &Remote,
    config_path: &Path,
    strategy_path: &Path,
    report_dir: Option<PathBuf>,
) -> Result<()> {
    let bundle = ConfigBundle::from_file(config_path)?;
    let config = bundle.validate()?;
    let Some(settings) = bundle.backtest.as_ref() else {
        bail!("{} has no [backtest] section", config_path.display());
    };
    stratdesk_core::validate::validate_backtest_window(settings)?;

    let strategy = Artifact::from_path(strategy_path, ArtifactKind::Strategy)
        .with_context(|| format!("reading {}", strategy_path.display()))?;
    let request = BacktestRequest::new(&config, settings, ctx.credentials.data_api_key.clone());
    let report_dir = report_dir.unwrap_or_else(|| settings.report_dir.clone());

    let mut session = Session::new(&config.strategy_name, SessionMode::Backtest);
    let mut controller = SessionController::new(&ctx.engine);
    let outcome = controller.run_backtest(
        &mut session,
        &strategy,
        config.trade_type,
        &request,
        &report_dir,
        Local::now().naive_local(),
    )?;

    for line in &outcome.logs {
        println!("{line}");
    }
    if let Some(stdout) = &outcome.stdout {
        println!("{stdout}");
    }
    println!();
    println!("=== Backtest ===");
    println!("Strategy:       {}", config.strategy_name);
    println!("Period:         {} to {}", settings.start_date, settings.end_date);
    println!("Report type:    {}", outcome.report_type.as_deref().unwrap_or("-"));
    if let Some(path) = &outcome.report_path {
        println!("Report:         {}", path.display());
    }
    if let Some(error) = &outcome.error {
        bail!("backtest failed: {error}");
    }
    Ok(())
}

fn run_trade(
    ctx: &Remote,
    store: &SessionStore,
    config_path: &Path,
    strategy_path: &Path,
    strategy_config_path: Option<&Path>,
    prices_path: Option<&Path>,
    method: String,
) -> Result<()> {
    let bundle = ConfigBundle::from_file(config_path)?;
    let checked = local_preflight(&bundle, prices_path)?;

    let strategy = Artifact::from_path(strategy_path, ArtifactKind::Strategy)
        .with_context(|| format!("reading {}", strategy_path.display()))?;
    let mut submission = Submission::new(checked, strategy);
    if let Some(path) = strategy_config_path {
        let config = Artifact::from_path(path, ArtifactKind::Config)
            .with_context(|| format!("reading {}", path.display()))?;
        submission = submission.with_config(config);
    }
    submission.method = method;

    let mut session = Session::new(submission.strategy_name(), SessionMode::Live);
    let mut controller = SessionController::new(&ctx.engine);
    controller.submit(&mut session, &submission)?;

    if session.session_id().is_some() {
        let path = store.save(&session)?;
        tracing::debug!(path = %path.display(), "session record saved");
    }

    println!();
    println!("=== Session Started ===");
    println!("Strategy:       {}", session.strategy_name());
    println!("Session:        {}", session.session_id().unwrap_or("-"));
    println!("Dashboard:      {}", session.dashboard_reference().unwrap_or("-"));
    if let Some(notice) = session.server_notice() {
        println!("Notice:         {notice}");
    }
    print_allocation(&submission.preflight.allocation);
    Ok(())
}

/// Split weighting needs candidates, so it requires local prices.
fn local_preflight(bundle: &ConfigBundle, prices_path: Option<&Path>) -> Result<Preflight> {
    match prices_path {
        Some(path) => {
            let Some(selector) = builtin_selector(&bundle.system.strategy_name) else {
                bail!("no local selector for strategy '{}'", bundle.system.strategy_name);
            };
            let prices = PriceFrame::from_csv_path(path)?;
            Ok(preflight(bundle, selector.as_ref(), &prices)?)
        }
        None => preflight_static(bundle)
            .context("local validation failed (split weighting needs --prices)"),
    }
}

fn load_session(store: &SessionStore, session_id: &str) -> Result<Session> {
    Ok(match store.load(session_id)? {
        Some(session) => session,
        None => {
            tracing::info!(session_id, "no local record, attaching to remote session");
            Session::attach(session_id, "unknown")
        }
    })
}

fn run_monitor(
    ctx: &Remote,
    store: &SessionStore,
    session_id: &str,
    monitor: &LogMonitor,
    offset: u64,
) -> Result<()> {
    let session = load_session(store, session_id)?;
    let controller = SessionController::new(&ctx.engine);
    let cancel = interrupt_flag()?;
    let summary = controller.monitor(&session, monitor, offset, &cancel, |line| {
        println!("{line}");
    })?;
    eprintln!("{}", monitor_footer(&summary));
    Ok(())
}

/// Flag raised by the first Ctrl-C. The signal is awaited on a side thread
/// so the blocking poll loop only has to check the flag.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting the Ctrl-C watcher")?;
    let raised = Arc::clone(&flag);
    std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupt received, stopping after the current poll");
                    raised.store(true, Ordering::Relaxed);
                }
            });
        })
        .context("spawning the Ctrl-C watcher")?;
    Ok(flag)
}

fn monitor_footer(summary: &MonitorSummary) -> String {
    let exit = match summary.exit {
        MonitorExit::Completed => "completed",
        MonitorExit::Cancelled => "cancelled",
        MonitorExit::DeadlineReached => "deadline reached",
    };
    format!(
        "{} line(s), {exit}; resume with --offset {}",
        summary.lines, summary.next_offset
    )
}

fn run_terminate(
    ctx: &Remote,
    store: &SessionStore,
    session_id: &str,
    account: Option<(&str, &str)>,
) -> Result<()> {
    let mut session = load_session(store, session_id)?;
    let controller = SessionController::new(&ctx.engine);

    let outcome = controller.terminate(&mut session);
    store.save(&session)?;
    match outcome? {
        TerminateOutcome::Terminated { message } => println!("Terminated: {message}"),
        TerminateOutcome::AlreadyTerminated => println!("Session {session_id} already terminated"),
    }

    let Some((product_type, margin_coin)) = account else {
        return Ok(());
    };
    let report = controller.reconcile(
        &mut session,
        ctx.credentials.user_key.expose(),
        product_type,
        margin_coin,
    )?;
    store.save(&session)?;
    match report {
        ReconcileReport::FullyLiquidated => println!("No open positions remain"),
        ReconcileReport::ResidualExposure(warning) => {
            println!("WARNING: {warning}");
            print_positions(&warning.positions);
        }
    }
    Ok(())
}

// ─── Output ──────────────────────────────────────────────────────────

fn join_or_dash(symbols: &[String]) -> String {
    if symbols.is_empty() {
        "-".into()
    } else {
        symbols.join(", ")
    }
}

fn print_allocation(allocation: &WeightAllocation) {
    println!();
    println!("{:<14} {:>10}", "Symbol", "Weight");
    println!("{}", "-".repeat(25));
    for (symbol, weight) in allocation.iter() {
        println!("{:<14} {:>+10.4}", symbol, weight);
    }
    println!("{:<14} {:>+10.4}", "Total", allocation.total());
}

fn print_positions(positions: &[PositionSnapshot]) {
    if positions.is_empty() {
        println!("No open positions");
        return;
    }
    println!(
        "{:<14} {:<6} {:>14} {:>14}",
        "Symbol", "Side", "Quantity", "Unrealized PL"
    );
    println!("{}", "-".repeat(51));
    for p in positions {
        let pl = p
            .unrealized_pl
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "-".into());
        let quantity = p
            .quantity
            .map(|q| q.to_string())
            .unwrap_or_else(|| "?".into());
        println!(
            "{:<14} {:<6} {:>14} {:>14}",
            p.symbol, p.hold_side, quantity, pl
        );
    }
}
