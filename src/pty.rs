//! Pseudo-terminal hosting the monitored CLI.
//!
//! - spawn the command on a fresh PTY sized like the user's terminal
//! - move bytes between the master side and tokio channels on two threads
//! - put the user's terminal in raw mode for transparent passthrough
//! - terminate and reap the child on shutdown

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execvp, fork, setsid, write, ForkResult, Pid};
use std::ffi::CString;
use std::io::IsTerminal;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl PtySize {
    /// Size of the terminal on our stdout, if there is one.
    pub fn detect() -> Option<Self> {
        let mut winsize = Self::default().winsize();
        // SAFETY: TIOCGWINSZ writes into a properly sized Winsize.
        let ok = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut winsize) == 0 };
        (ok && winsize.ws_row > 0 && winsize.ws_col > 0).then_some(Self {
            rows: winsize.ws_row,
            cols: winsize.ws_col,
        })
    }

    /// Explicit size when both dimensions are given, else detected, else 24x80.
    pub fn resolve(rows: Option<u16>, cols: Option<u16>) -> Self {
        match (rows, cols) {
            (Some(rows), Some(cols)) => Self { rows, cols },
            _ => Self::detect().unwrap_or_default(),
        }
    }

    fn winsize(&self) -> Winsize {
        Winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

/// Child process running on the slave side of a PTY
pub struct Pty {
    master_fd: OwnedFd,
    child_pid: Pid,
    /// Cleared when the child exits or the master reports EOF/EIO
    running: Arc<AtomicBool>,
}

impl Pty {
    pub fn spawn(command: &[String], size: PtySize) -> Result<Self> {
        if command.is_empty() {
            anyhow::bail!("Command cannot be empty");
        }
        // Built before fork: the child must not allocate or fail
        let argv = command
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Command contains a NUL byte")?;

        let OpenptyResult { master, slave } =
            openpty(&size.winsize(), None).context("Failed to open PTY")?;

        // SAFETY: the child only calls async-signal-safe functions before exec.
        match unsafe { fork() }.context("Failed to fork")? {
            ForkResult::Parent { child } => {
                drop(slave);

                let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)?;
                let flags = OFlag::from_bits_truncate(flags);
                fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

                info!("Spawned {:?} with PID {}", command[0], child);
                Ok(Self {
                    master_fd: master,
                    child_pid: child,
                    running: Arc::new(AtomicBool::new(true)),
                })
            }
            ForkResult::Child => {
                drop(master);
                let _ = setsid();

                let slave_raw = slave.as_raw_fd();
                // SAFETY: make the slave our controlling terminal.
                unsafe {
                    libc::ioctl(slave_raw, libc::TIOCSCTTY as libc::c_ulong, 0);
                }
                let _ = dup2(slave_raw, libc::STDIN_FILENO);
                let _ = dup2(slave_raw, libc::STDOUT_FILENO);
                let _ = dup2(slave_raw, libc::STDERR_FILENO);
                if slave_raw > 2 {
                    drop(slave);
                }

                let _ = execvp(&argv[0], &argv);
                // SAFETY: exec failed; leave without running parent destructors.
                unsafe { libc::_exit(127) }
            }
        }
    }

    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn master_fd(&self) -> RawFd {
        self.master_fd.as_raw_fd()
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = signal::kill(self.child_pid, Signal::SIGTERM);
        }
    }
}

/// Raw mode on stdin for as long as the guard lives.
///
/// A no-op when stdin is not a terminal (headless runs, tests).
pub struct RawModeGuard {
    original: Option<Termios>,
}

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            debug!("stdin is not a TTY, skipping raw mode (headless mode)");
            return Ok(Self { original: None });
        }

        let original = termios::tcgetattr(&stdin).context("Failed to get terminal attributes")?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).context("Failed to set raw mode")?;

        debug!("Terminal set to raw mode");
        Ok(Self {
            original: Some(original),
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.original.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(original) = &self.original {
            let _ = termios::tcsetattr(&std::io::stdin(), SetArg::TCSANOW, original);
            debug!("Terminal restored");
        }
    }
}

/// Async PTY wrapper for use with tokio
///
/// Reads and writes run on dedicated threads; the master fd is non-blocking
/// and has to be polled either way.
pub struct AsyncPty {
    output_rx: mpsc::Receiver<Vec<u8>>,
    input_tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    child_pid: Pid,
    /// Borrowed from `pty` (for resize)
    master_fd: RawFd,
    /// Owned PTY for lifecycle management
    pty: Option<Pty>,
}

impl AsyncPty {
    pub fn new(pty: Pty) -> Self {
        let running = pty.running_flag();
        let child_pid = pty.child_pid();
        let master_fd = pty.master_fd();

        let (output_tx, output_rx) = mpsc::channel(64);
        let (input_tx, input_rx) = mpsc::channel(64);

        let reader_running = Arc::clone(&running);
        std::thread::spawn(move || read_master(master_fd, reader_running, output_tx));

        let writer_running = Arc::clone(&running);
        std::thread::spawn(move || write_master(master_fd, writer_running, input_rx));

        Self {
            output_rx,
            input_tx,
            running,
            child_pid,
            master_fd,
            pty: Some(pty),
        }
    }

    /// Next chunk of child output; `None` once the child side is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.output_rx.recv().await
    }

    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.input_tx
            .send(data)
            .await
            .map_err(|_| anyhow::anyhow!("PTY channel closed"))
    }

    /// Another handle onto the input side.
    pub fn input_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.input_tx.clone()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                false
            }
            Ok(_) => true,
        }
    }

    pub fn resize(&self, size: PtySize) -> Result<()> {
        let winsize = size.winsize();
        // SAFETY: the fd stays open while `self.pty` is held.
        unsafe {
            if libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) < 0 {
                anyhow::bail!("Failed to resize PTY");
            }
        }
        debug!("PTY resized to {}x{}", size.cols, size.rows);
        Ok(())
    }

    pub fn signal(&self, sig: Signal) -> Result<()> {
        signal::kill(self.child_pid, sig)?;
        Ok(())
    }

    /// Terminate the child (SIGTERM, then SIGKILL after 2 s) and reap it.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.pty.is_none() {
            return Ok(());
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.signal(Signal::SIGTERM);

        let start = Instant::now();
        let mut reaped = false;
        while start.elapsed() < Duration::from_secs(2) {
            match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => std::thread::sleep(Duration::from_millis(50)),
                Ok(_) | Err(nix::errno::Errno::ECHILD) => {
                    reaped = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !reaped {
            let _ = self.signal(Signal::SIGKILL);
            let _ = waitpid(self.child_pid, None);
        }

        self.pty.take();
        Ok(())
    }
}

impl Drop for AsyncPty {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn read_master(fd: RawFd, running: Arc<AtomicBool>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    while running.load(Ordering::SeqCst) {
        match nix::unistd::read(fd, &mut buf) {
            Ok(0) => {
                running.store(false, Ordering::SeqCst);
                break;
            }
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(nix::errno::Errno::EAGAIN) => std::thread::sleep(Duration::from_millis(10)),
            Err(nix::errno::Errno::EIO) => {
                // Slave side closed: the child is gone
                running.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!("PTY read error: {}", e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    debug!("PTY reader exiting");
}

fn write_master(fd: RawFd, running: Arc<AtomicBool>, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = rx.blocking_recv() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let mut written = 0;
        while written < data.len() {
            // SAFETY: the fd outlives this thread's use of it (closed after shutdown).
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match write(borrowed, &data[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EAGAIN) => std::thread::sleep(Duration::from_millis(1)),
                Err(e) => {
                    error!("PTY write error: {}", e);
                    break;
                }
            }
        }
    }
    debug!("PTY writer exiting");
}
