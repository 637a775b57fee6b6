//! ospec-selfcheck CLI
//!
//! Run the built-in demonstration suite and report the result.

use std::cell::Cell;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;
use clap::{Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use ospec::{BailScope, OspecError, RunConfig, Runner, Spec};

#[derive(Parser, Debug)]
#[command(name = "ospec-selfcheck")]
#[command(version)]
#[command(about = "Run the built-in ospec demonstration suite")]
struct Cli {
    /// Stop at the first failed test or hook
    #[arg(long)]
    bail: bool,

    /// How far a bail reaches
    #[arg(long = "bail-scope", value_enum, default_value_t = Scope::Run)]
    bail_scope: Scope,

    /// Default timeout for units with none in their ancestry
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// How long to wait for timed-out bodies after the tree completes
    #[arg(long = "drain-ms")]
    drain_ms: Option<u64>,

    /// Verbose output: show the execution log
    #[arg(short, long)]
    verbose: bool,

    /// Diagnostic log level
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scope {
    Run,
    Group,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

fn init_logger(level: LogLevel) {
    let filter = EnvFilter::new(format!("ospec={}", level.to_tracing_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.log_level);

    let mut config = RunConfig::from_env();
    config.name = "selfcheck".into();
    config.bail_on_first_failure |= cli.bail;
    config.verbose |= cli.verbose;
    if cli.bail_scope == Scope::Group {
        config.bail_scope = BailScope::Group;
    }
    if let Some(ms) = cli.timeout_ms {
        config.default_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.drain_ms {
        config.drain_timeout = Some(Duration::from_millis(ms));
    }

    let suite = match demo_suite() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let verbose = config.verbose;
    let report = match Runner::new(config).run_blocking(suite) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if verbose && !report.log.is_empty() {
        println!("--- log ---");
        print!("{}", report.log);
        println!();
    }
    println!("{}", report);

    if report.exit_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Hooks at two levels, sync and async tests, a timeout override and an
/// anonymous test.
fn demo_suite() -> Result<Spec, OspecError> {
    let connections = Rc::new(Cell::new(0u32));
    let mut root = Spec::new();

    let c = connections.clone();
    root.before(move |_| {
        c.set(1);
        Ok(())
    });
    let c = connections.clone();
    root.after(move |_| {
        c.set(0);
        Ok(())
    });

    let c = connections.clone();
    root.group("connection", move |g| {
        let seen = Rc::new(Cell::new(0u32));
        let s = seen.clone();
        g.before_each(move |_| {
            s.set(s.get() + 1);
            Ok(())
        });

        let open = c.clone();
        g.test("is open", move |o| {
            o.assert().eq(&open.get(), &1)?;
            Ok(())
        })?;
        let s = seen.clone();
        g.test("beforeEach ran for each test", move |o| {
            o.assert().eq(&s.get(), &2)?;
            Ok(())
        })
    })?;

    root.group("async", |g| {
        g.timeout(Duration::from_millis(100));
        g.test_async("settles in time", |o| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            o.assert().ok(true, "sleep returns")?;
            Ok(())
        })?;
        g.test_async("extends its own timeout", |o| async move {
            o.timeout(Duration::from_millis(500))?;
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        })?;
        g.group("text", |g| {
            g.it(|o| {
                o.assert().text_eq("a\nb\n", "a\nb\n")?;
                Ok(())
            })
        })
    })?;

    Ok(root)
}
