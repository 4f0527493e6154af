//! dialog-pilot: PTY wrapper that auto-answers assistant CLI dialogs
//!
//! Runs the CLI in a PTY, tees its output into a log file, and lets the
//! session answer confirmation dialogs from that log. A Unix socket accepts
//! control requests (mode changes, manual answers, status).
//!
//! Usage:
//!   dialog-pilot --mode auto -- claude

use anyhow::{Context, Result};
use clap::Parser;
use dialog_pilot::config::Config;
use dialog_pilot::control;
use dialog_pilot::inhibit::{CommandInhibitor, NoopInhibitor, SleepInhibitor};
use dialog_pilot::inject::keystroke_channel;
use dialog_pilot::mode::{JsonModeStore, Mode, ModeController};
use dialog_pilot::protocol::ControlRequest;
use dialog_pilot::pty::{AsyncPty, Pty, PtySize, RawModeGuard};
use dialog_pilot::session::SessionController;
use dialog_pilot::skiplog::SkipLog;
use dialog_pilot::socket::{ControlCommand, ControlServer};
use dialog_pilot::tailer::FileLogSource;
use dialog_pilot::watcher::LogWatcher;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the session's deadlines are checked
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// PTY wrapper that auto-answers assistant CLI confirmation dialogs
#[derive(Parser, Debug)]
#[command(name = "dialog-pilot")]
#[command(about = "PTY wrapper that auto-answers assistant CLI confirmation dialogs")]
#[command(version)]
struct Args {
    /// JSON settings file
    #[arg(long, default_value = ".dialog-pilot.json")]
    config: PathBuf,

    /// Output log the session tails (cleared at start)
    #[arg(long, default_value = ".claude-output.log")]
    log_file: PathBuf,

    /// Where the mode is persisted between runs
    #[arg(long, default_value = ".dialog-pilot-state.json")]
    state_file: PathBuf,

    /// Unix socket path (default: /tmp/dialog-pilot-{pid}.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log of answered and refused dialogs
    #[arg(long, default_value = ".claude-skipped.ndjson")]
    skip_log: PathBuf,

    /// Mode to start in (off, auto, continuous); defaults to the persisted one
    #[arg(long)]
    mode: Option<Mode>,

    /// Never hold a system sleep inhibitor
    #[arg(long)]
    no_sleep_prevention: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Terminal rows (for headless mode)
    #[arg(long)]
    rows: Option<u16>,

    /// Terminal columns (for headless mode)
    #[arg(long)]
    cols: Option<u16>,

    /// Command to run (after --)
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!("dialog-pilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Command: {:?}", args.command);

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("/tmp/dialog-pilot-{}.sock", std::process::id())));

    let mut log_file = open_log(&args.log_file)?;
    info!("Logging output to: {}", args.log_file.display());

    // Bind before spawning so a bad socket path fails fast
    let (command_tx, mut command_rx) = mpsc::channel::<ControlCommand>(16);
    let server = ControlServer::new(&socket_path, command_tx);
    let listener = server.bind()?;

    let size = PtySize::resolve(args.rows, args.cols);
    info!("Terminal size: {}x{}", size.cols, size.rows);
    let pty = Pty::spawn(&args.command, size).context("Failed to spawn command")?;

    let raw_mode = RawModeGuard::enable().context("Failed to set raw mode")?;
    if raw_mode.is_interactive() {
        info!("Running in interactive mode (TTY)");
    } else {
        info!("Running in headless mode (no TTY)");
    }

    let mut async_pty = AsyncPty::new(pty);
    let (terminal, pacer) = keystroke_channel(async_pty.input_sender(), async_pty.running_flag());
    let pacer_handle = tokio::spawn(pacer.run());

    let inhibitor: Box<dyn SleepInhibitor> = if args.no_sleep_prevention {
        Box::new(NoopInhibitor::new())
    } else {
        Box::new(CommandInhibitor::new())
    };
    let modes = ModeController::new(Box::new(JsonModeStore::new(&args.state_file)));
    let mut session = SessionController::new(config, FileLogSource::new(&args.log_file), modes)
        .with_terminal(Box::new(terminal))
        .with_inhibitor(inhibitor)
        .with_skip_log(SkipLog::new(&args.skip_log));
    session.start(Instant::now());
    if let Some(mode) = args.mode {
        session.set_mode(mode, Instant::now());
    }
    info!("Mode: {}", session.mode());

    let mut watcher = match LogWatcher::start(&args.log_file) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Failed to watch log file, relying on polling: {}", e);
            None
        }
    };

    let socket_handle = tokio::spawn(server.run(listener));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigwinch = signal(SignalKind::window_change())?;

    // Keyboard passthrough (also works for piped input)
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(32);
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stdout = tokio::io::stdout();

    loop {
        select! {
            _ = sigint.recv() => {
                info!("SIGINT received");
                let _ = async_pty.signal(nix::sys::signal::Signal::SIGINT);
            }

            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }

            _ = sigwinch.recv() => {
                debug!("SIGWINCH received");
                if let Some(size) = PtySize::detect() {
                    let _ = async_pty.resize(size);
                }
            }

            Some(data) = stdin_rx.recv() => {
                debug!("Received {} bytes from stdin", data.len());
                if let Err(e) = async_pty.send(data).await {
                    error!("Failed to send to PTY: {}", e);
                }
            }

            result = async_pty.recv() => {
                let Some(data) = result else {
                    info!("PTY closed");
                    session.terminal_closed();
                    break;
                };

                // Some CLIs block on a cursor position query (CSI 6n) until answered
                let text = String::from_utf8_lossy(&data);
                if text.contains("\x1b[6n") || text.contains("\x1b[?6n") {
                    debug!("Detected cursor position query, answering");
                    if let Err(e) = async_pty.send(b"\x1b[1;1R".to_vec()).await {
                        warn!("Failed to send cursor position response: {}", e);
                    }
                }

                stdout.write_all(&data).await?;
                stdout.flush().await?;

                if let Err(e) = log_file.write_all(&data).and_then(|_| log_file.flush()) {
                    debug!("Failed to write output log: {}", e);
                }
            }

            Some(()) = next_change(&mut watcher) => {
                session.on_log_change(Instant::now());
            }

            _ = ticker.tick() => {
                session.tick(Instant::now());
            }

            Some(command) = command_rx.recv() => {
                let shutdown = command.request == ControlRequest::Shutdown;
                let response = control::dispatch(&mut session, command.request, Instant::now());
                let _ = command.response_tx.send(response);
                if shutdown {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        if !async_pty.is_running() {
            info!("Child process exited");
            session.terminal_closed();
            break;
        }
    }

    info!("Shutting down...");

    // Let the socket task flush a pending shutdown reply
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _ = async_pty.shutdown();
    drop(raw_mode);

    let _ = std::fs::remove_file(&socket_path);
    socket_handle.abort();
    pacer_handle.abort();

    info!("Goodbye!");
    Ok(())
}

/// Truncate the output log and reopen it for appending.
///
/// Append mode keeps writes at the end even after the tailer shortens the
/// file.
fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create log directory {:?}: {}", parent, e);
            }
        }
    }
    File::create(path).context(format!("Failed to clear log file: {}", path.display()))?;
    OpenOptions::new()
        .append(true)
        .open(path)
        .context(format!("Failed to open log file: {}", path.display()))
}

/// Next change from the watcher; never resolves without one.
async fn next_change(watcher: &mut Option<LogWatcher>) -> Option<()> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}
