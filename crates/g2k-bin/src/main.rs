//! GlassToKey headless entrypoint: capture replay and self-test.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use core_capture::{Fixture, ReplayRunner};
use core_config::load_from;


/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "glasstokey", version, about = "GlassToKey replay harness")]
struct Args {
    /// Replay an ATPCAP capture and verify replay determinism.
    #[arg(long = "replay")]
    replay: Option<PathBuf>,
    /// Compare the replay against a saved fixture (requires --replay).
    #[arg(long = "fixture", requires = "replay")]
    fixture: Option<PathBuf>,
    /// Write the replay's fingerprints out as a fixture (requires --replay).
    #[arg(long = "emit-fixture", requires = "replay")]
    emit_fixture: Option<PathBuf>,
    /// Run the built-in engine scenarios and exit.
    #[arg(long = "self-test")]
    self_test: bool,
    /// Optional configuration file path (overrides discovery of
    /// `glasstokey.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(Path::new("."), "glasstokey.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => {
            // Global subscriber already installed; drop guard so the writer
            // shuts down.
            None
        }
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn run_replay(args: &Args, capture_path: &Path) -> Result<bool> {
    let config = load_from(args.config.clone())?;
    let bytes = std::fs::read(capture_path)
        .with_context(|| format!("reading capture {}", capture_path.display()))?;
    let runner = match ReplayRunner::from_bytes(&bytes, config.file.engine.clone()) {
        Ok(runner) => runner,
        Err(err) => {
            error!(target: "runtime.replay", %err, "capture_parse_failed");
            eprintln!("parse error: {err}");
            return Ok(false);
        }
    };

    let decoded = runner.decoded();
    info!(
        target: "runtime.replay",
        frames = decoded.frames.len(),
        opaque = decoded.opaque_records,
        tick_hz = decoded.tick_hz,
        "replay_loaded"
    );
    println!(
        "capture: {} frames, {} opaque records, tick_hz {}",
        decoded.frames.len(),
        decoded.opaque_records,
        decoded.tick_hz
    );

    let report = runner.verify_determinism();
    println!(
        "fingerprints: raw {:016x} intent {:016x} dispatch {:016x} ({} events)",
        report.first.raw_fingerprint,
        report.first.intent_fingerprint,
        report.first.dispatch_fingerprint,
        report.first.events_dispatched
    );
    if !report.deterministic() {
        for line in &report.mismatches {
            eprintln!("determinism failure: {line}");
        }
        return Ok(false);
    }
    println!("determinism: ok");

    if let Some(fixture_path) = &args.fixture {
        let fixture: Fixture = serde_json::from_slice(
            &std::fs::read(fixture_path)
                .with_context(|| format!("reading fixture {}", fixture_path.display()))?,
        )
        .with_context(|| format!("parsing fixture {}", fixture_path.display()))?;
        let diffs = fixture.compare(&report.first);
        if !diffs.is_empty() {
            for line in &diffs {
                eprintln!("fixture mismatch: {line}");
            }
            return Ok(false);
        }
        println!("fixture: ok");
    }

    if let Some(out_path) = &args.emit_fixture {
        let fixture = Fixture::from_pass(&report.first);
        std::fs::write(out_path, serde_json::to_vec_pretty(&fixture)?)
            .with_context(|| format!("writing fixture {}", out_path.display()))?;
        println!("fixture written: {}", out_path.display());
    }

    Ok(true)
}

fn main() -> ExitCode {
    let _log_guard = configure_logging();
    install_panic_hook();
    let args = Args::parse();
    info!(target: "runtime", "startup");

    let outcome: Result<bool> = if args.self_test {
        Ok(self_test::run())
    } else if let Some(capture) = args.replay.clone() {
        run_replay(&args, &capture)
    } else {
        eprintln!("nothing to do: pass --replay <path> or --self-test");
        Ok(false)
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!(target: "runtime", %err, "fatal");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
