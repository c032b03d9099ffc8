//! gotracer entrypoint.
//!
//! Orchestrates the trace pipeline: mirror the target project, rewrite the
//! mirror's sources, drop in the tracing runtime, run the instrumented
//! program with its stdout teed into `instrumented.log`, build the
//! concurrency graph from the stream, and render DOT to stdout. Logging goes
//! to stderr so stdout stays parseable.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::time::Instant;
use tracing::{error, info};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "gotracer", version, about = "Concurrency tracer for Go projects")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Instrument a project, run it, and render its concurrency graph as DOT.
    Run {
        /// Target project to trace (required).
        #[arg(long, short)]
        target: PathBuf,
        /// Instrumented mirror directory; defaults to `<target>_instrumented`.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Log level (0 info, 1 warn, 2 error, 3 debug).
        #[arg(long, short = 'l', default_value_t = 0)]
        log: u8,
        /// Configuration file path (overrides discovery of `gotracer.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Reserved: serve rendered traces over HTTP.
    Server {
        /// Port to listen on.
        #[arg(long, short, default_value = "8080")]
        port: String,
        /// Log level (0 info, 1 warn, 2 error, 3 debug).
        #[arg(long, short = 'l', default_value_t = 0)]
        log: u8,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(e) => {
            let msg = format!("{e:#}");
            error!(target: "runtime", error = %msg, "command_failed");
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    // Usage errors exit 1 like every other failure; --help/--version stay 0.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    match args.command {
        Command::Run {
            target,
            output,
            log,
            config,
        } => {
            configure_logging(log);
            let command = TraceCommand::new(target, output, config)?;
            run_traced(&command)
        }
        Command::Server { port, log } => {
            configure_logging(log);
            error!(target: "runtime", port = %port, "server_mode_unavailable");
            bail!("server mode is reserved and not implemented")
        }
    }
}

/// `--log` levels follow the original CLI contract; `RUST_LOG` wins when set.
fn log_directive(level: u8) -> &'static str {
    match level {
        1 => "warn",
        2 => "error",
        3 => "debug",
        _ => "info",
    }
}

fn configure_logging(level: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive(level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug)]
struct TraceCommand {
    target: PathBuf,
    output: PathBuf,
    config: core_config::Config,
}

impl TraceCommand {
    fn new(target: PathBuf, output: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        if !target.is_dir() {
            bail!("target project {} is not a directory", target.display());
        }
        let output = output.unwrap_or_else(|| default_output_path(&target));
        let config = core_config::load_from(config)?;
        Ok(Self {
            target,
            output,
            config,
        })
    }
}

fn default_output_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    target.with_file_name(format!("{name}_instrumented"))
}

/// Execute the trace command with outcome and duration logging.
fn run_traced(command: &TraceCommand) -> Result<()> {
    let started = Instant::now();
    info!(
        target: "command",
        target_path = %command.target.display(),
        output_path = %command.output.display(),
        "trace_begin"
    );
    match trace_project(command) {
        Ok(()) => {
            info!(
                target: "command",
                duration_ms = started.elapsed().as_millis() as u64,
                "trace_complete"
            );
            Ok(())
        }
        Err(e) => {
            let msg = format!("{e:#}");
            error!(
                target: "command",
                duration_ms = started.elapsed().as_millis() as u64,
                error = %msg,
                "trace_failed"
            );
            Err(e)
        }
    }
}

fn trace_project(command: &TraceCommand) -> Result<()> {
    core_mirror::mirror_project(
        &command.target,
        &command.output,
        &command.config.file.mirror.ignore,
    )
    .context("mirroring target project")?;

    let import_path = core_mirror::modpath::runtime_import_path(&command.output);
    core_instrument::instrument_project(&command.output, &import_path)
        .context("instrumenting mirror")?;
    core_instrument::runtime::write_runtime_package(&command.output)
        .context("writing tracing runtime")?;

    let graph = run_instrumented(&command.output, &command.config.file.toolchain.command)?;
    print!("{}", core_trace::dot::render_dot(&graph));
    Ok(())
}

/// Build and run the instrumented mirror, teeing its stdout into
/// `instrumented.log` while the graph builder consumes it line by line.
fn run_instrumented(mirror: &Path, go_command: &str) -> Result<core_trace::ConcurrencyGraph> {
    info!(
        target: "toolchain",
        command = go_command,
        dir = %mirror.display(),
        "child_spawn"
    );
    let mut child = ProcessCommand::new(go_command)
        .args(["run", "."])
        .current_dir(mirror)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("spawning `{go_command} run .`"))?;
    let stdout = child.stdout.take().context("child stdout unavailable")?;

    let log_path = mirror.join("instrumented.log");
    let (tx, rx) = crossbeam_channel::bounded::<String>(1024);
    let reader = std::thread::spawn(move || -> std::io::Result<()> {
        let mut log = File::create(&log_path)?;
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            writeln!(log, "{line}")?;
            if tx.send(line).is_err() {
                break;
            }
        }
        Ok(())
    });

    let mut builder = core_trace::GraphBuilder::new();
    let mut parse_result: Result<(), core_trace::TraceError> = Ok(());
    for line in &rx {
        if let Err(e) = builder.ingest_line(&line) {
            parse_result = Err(e);
            break;
        }
    }
    // Unblock the reader thread before joining it.
    drop(rx);

    if parse_result.is_err() {
        let _ = child.kill();
    }
    let status = child.wait().context("waiting for instrumented program")?;
    match reader.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) if parse_result.is_ok() => {
            return Err(core_trace::TraceError::Io(e).into());
        }
        Ok(Err(_)) => {}
        Err(_) => bail!("stdout reader thread panicked"),
    }
    parse_result?;
    if !status.success() {
        bail!("instrumented program exited with status {status}");
    }
    info!(
        target: "toolchain",
        log = %mirror.join("instrumented.log").display(),
        "child_complete"
    );
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_is_a_sibling_with_suffix() {
        assert_eq!(
            default_output_path(Path::new("/work/demo")),
            PathBuf::from("/work/demo_instrumented")
        );
        assert_eq!(
            default_output_path(Path::new("demo")),
            PathBuf::from("demo_instrumented")
        );
    }

    #[test]
    fn log_levels_follow_the_cli_contract() {
        assert_eq!(log_directive(0), "info");
        assert_eq!(log_directive(1), "warn");
        assert_eq!(log_directive(2), "error");
        assert_eq!(log_directive(3), "debug");
        assert_eq!(log_directive(9), "info");
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = TraceCommand::new(
            PathBuf::from("/definitely/not/a/dir"),
            None,
            Some(PathBuf::from("__no_config__.toml")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn trace_command_derives_output_from_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("demo");
        std::fs::create_dir(&target).unwrap();
        let command = TraceCommand::new(
            target.clone(),
            None,
            Some(PathBuf::from("__no_config__.toml")),
        )
        .unwrap();
        assert_eq!(command.output, dir.path().join("demo_instrumented"));
    }
}
