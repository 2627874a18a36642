//! `tick` entry point.
//!
//! Clock-pulse generator: arms a signal-driven interval timer and drives a
//! digital output on every tick, collecting inter-tick statistics. Stops on
//! SIGINT/SIGTERM, after `--max-ticks`, or on an output failure.

mod signals;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use stimer_common::config::TickConfig;
use stimer_common::daytime::DayTick;
use stimer_common::metrics::{MetricsSnapshot, TickMetrics};
use stimer_runtime::output::{DigitalOutput, FakeOutput};
use stimer_runtime::pulse::{PulseGenerator, OUTPUT_FAILURE};
use stimer_runtime::realtime::init_realtime;
use stimer_runtime::{IntervalTimer, TimerHandle};
use tracing::{debug, info, warn};

/// Callback result when a data line cannot be written to stdout.
const DATA_WRITE_FAILURE: i32 = -2;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "tick",
    about = "Clock-pulse generator driven by a POSIX interval timer",
    version,
    long_about = None
)]
struct Args {
    /// Timer interval in milliseconds (100 by default).
    #[arg(value_name = "INTERVAL_MS")]
    interval_ms: Option<f64>,

    /// Verbose output (repeat for more). Cancels an earlier `--data`.
    #[arg(long, short = 'v', action = ArgAction::Count, overrides_with = "data")]
    verbose: u8,

    /// Most verbose output. Cancels an earlier `--data`.
    #[arg(long, overrides_with = "data")]
    more_verbose: bool,

    /// Print one JSON line per tick to stdout and keep logging quiet.
    /// Cancels earlier verbosity flags.
    #[arg(long, short = 'd', overrides_with_all = ["verbose", "more_verbose"])]
    data: bool,

    /// Negative output: idle high, pulses low.
    #[arg(long, short = 'n')]
    negative: bool,

    /// Meander mode: toggle every tick (period 2*T).
    #[arg(long, short = 'm')]
    meandr: bool,

    /// Pulse width in busy-loop iterations.
    #[arg(long, short = 't', value_name = "N")]
    tau: Option<u32>,

    /// Real-time scheduling (requires root or CAP_SYS_NICE).
    #[arg(long = "real-time", short = 'r')]
    real_time: bool,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many ticks (0 = run until interrupted).
    #[arg(long, value_name = "N")]
    max_ticks: Option<u64>,
}

impl Args {
    fn verbosity(&self) -> u8 {
        if self.more_verbose {
            3
        } else {
            self.verbose
        }
    }

    fn log_level(&self) -> &'static str {
        match (self.data, self.verbosity()) {
            (true, 0) => "warn",
            (_, 0) => "info",
            (_, 1) => "debug",
            _ => "trace",
        }
    }

    /// Command-line flags override the configuration file.
    fn apply(&self, config: &mut TickConfig) {
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }
        if let Some(max_ticks) = self.max_ticks {
            config.max_ticks = max_ticks;
        }
        if let Some(tau) = self.tau {
            config.output.tau = tau;
        }
        config.output.negative |= self.negative;
        config.output.meandr |= self.meandr;
        config.realtime.enabled |= self.real_time;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level());

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tick");

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let started = DayTick::now_from(config.day_clock);
    info!(daytime = %started, clock = ?config.day_clock, "Local day time");
    info!(
        interval_ms = config.interval_ms,
        verbose = args.verbosity(),
        negative = config.output.negative,
        meandr = config.output.meandr,
        tau = config.output.tau,
        realtime = config.realtime.enabled,
        max_ticks = config.max_ticks,
        "Tick parameters"
    );

    let rt_status =
        init_realtime(&config.realtime).context("Failed to initialize real-time scheduling")?;
    debug!(?rt_status, "Real-time status");

    let summary = run(&config, args.data)?;
    print_summary(&summary, &config, args.data)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("tick={level},stimer_runtime={level},stimer_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `STIMER_CONFIG_PATH` environment variable
/// 3. `/etc/stimer/tick.toml` (system path)
/// 4. Built-in defaults
fn load_config(cli_path: Option<&Path>) -> Result<TickConfig> {
    if let Some(config_path) = cli_path {
        info!(?config_path, "Loading config from command-line argument");
        return TickConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("STIMER_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from STIMER_CONFIG_PATH");
            return TickConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from STIMER_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "STIMER_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/stimer/tick.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return TickConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(TickConfig::default())
}

/// Everything the tick callback needs.
struct TickContext<O> {
    generator: PulseGenerator<O>,
    handle: Option<TimerHandle>,
    max_ticks: u64,
    data: bool,
    /// Ticks between status log lines (0 = never).
    report_every: u64,
}

fn on_tick<O: DigitalOutput>(ctx: &mut TickContext<O>) -> i32 {
    let code = ctx.generator.on_tick();
    if code != 0 {
        return code;
    }
    let ticks = ctx.generator.ticks();

    if let Some(handle) = &ctx.handle {
        ctx.generator
            .metrics_mut()
            .set_overrun_count(handle.overrun_count());
        if ctx.max_ticks > 0 && ticks >= ctx.max_ticks {
            debug!(ticks, "Tick limit reached");
            handle.stop();
        }
    }

    if ctx.data {
        if let Some(sample) = ctx.generator.sample() {
            let written = serde_json::to_string(&sample)
                .map_err(io::Error::from)
                .and_then(|line| writeln!(io::stdout().lock(), "{line}"));
            if let Err(e) = written {
                warn!(error = %e, "Failed to write tick data");
                return DATA_WRITE_FAILURE;
            }
        }
    }

    if ctx.report_every > 0 && ticks % ctx.report_every == 0 {
        let metrics = ctx.generator.metrics();
        info!(
            ticks,
            overruns = metrics.overrun_count(),
            late = metrics.late_count(),
            mean = ?metrics.mean(),
            "Status"
        );
    }
    0
}

/// Result of a completed run.
#[derive(Debug)]
struct RunSummary {
    ticks: u64,
    snapshot: MetricsSnapshot,
    percentiles: Vec<(f64, std::time::Duration)>,
}

fn run(config: &TickConfig, data: bool) -> Result<RunSummary> {
    let period = config.period();
    let metrics = TickMetrics::new(
        config.metrics.histogram_size,
        period,
        config.metrics.late_threshold,
    );
    let mut generator = PulseGenerator::new(FakeOutput::new(), &config.output, metrics)
        .with_day_clock(config.day_clock);
    generator.init().context("Failed to initialize output")?;

    let period_ns = period.as_nanos().max(1);
    let report_every = u64::try_from(config.report_interval.as_nanos() / period_ns)
        .unwrap_or(u64::MAX);

    let ctx = TickContext {
        generator,
        handle: None,
        max_ticks: config.max_ticks,
        data,
        report_every,
    };

    let mut timer = IntervalTimer::with_config(&config.timer, on_tick::<FakeOutput>, ctx)
        .context("Failed to initialize timer")?;
    let handle = timer.handle();
    timer.context_mut().handle = Some(handle.clone());

    let shutdown = signals::install(handle).context("Failed to set up signal handlers")?;

    timer
        .start(config.interval_ms)
        .context("Failed to start timer")?;
    let code = timer.run_loop().context("Timer loop failed")?;
    debug!(code, "Timer loop returned");

    if let Some(signal) = shutdown.last() {
        info!(%signal, received = shutdown.count(), "Interrupted");
    }
    if let Some(err) = timer.overrun_query_error() {
        warn!(error = %err, "Overrun counts may be incomplete");
    }

    let overruns = timer.overrun_count();
    let generator = &mut timer.context_mut().generator;
    generator.metrics_mut().set_overrun_count(overruns);
    if let Err(e) = generator.release() {
        warn!(error = %e, "Failed to release output");
    }

    match code {
        0 => {}
        OUTPUT_FAILURE => match generator.last_error() {
            Some(err) => bail!("Output failed: {err}"),
            None => bail!("Output failed"),
        },
        DATA_WRITE_FAILURE => bail!("Failed to write tick data"),
        other => bail!("Tick callback returned {other}"),
    }

    let metrics = generator.metrics();
    Ok(RunSummary {
        ticks: generator.ticks(),
        snapshot: metrics.snapshot(),
        percentiles: metrics.percentiles(&config.metrics.percentiles),
    })
}

fn print_summary(summary: &RunSummary, config: &TickConfig, data: bool) -> Result<()> {
    let mut out = io::stdout().lock();

    if data {
        let line = serde_json::json!({ "ticks": summary.ticks, "summary": summary.snapshot });
        writeln!(out, "{line}").context("Failed to write summary")?;
        return Ok(());
    }

    let snap = &summary.snapshot;
    let us = |ns: Option<u64>| ns.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v as f64 / 1e3));

    writeln!(out, "ticks          = {}", summary.ticks)?;
    writeln!(out, "interval [ms]  = {}", config.interval_ms)?;
    writeln!(out, "min [us]       = {}", us(snap.min_ns))?;
    writeln!(out, "mean [us]      = {}", us(snap.mean_ns))?;
    writeln!(out, "max [us]       = {}", us(snap.max_ns))?;
    writeln!(out, "max jitter [us]= {}", us(Some(snap.max_jitter_ns)))?;
    for (p, d) in &summary.percentiles {
        writeln!(out, "p{p:<13}= {:.1}", d.as_secs_f64() * 1e6)?;
    }
    writeln!(out, "late           = {}", snap.late_count)?;
    writeln!(out, "overruns       = {}", snap.overrun_count)?;
    Ok(())
}
