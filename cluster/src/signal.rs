//! Process signals.

use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Signals the supervisor sends to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGTERM`: drain and exit.
    Terminate,
    /// `SIGKILL`: exit now.
    Kill,
}

impl Signal {
    const fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Sends `signal` to process `pid`.
///
/// # Errors
///
/// Returns the OS error; `ESRCH` means the process is already gone.
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) takes two integers and touches no memory we own.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, signal.raw()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Returns true if `error` says the target process no longer exists.
#[must_use]
pub fn is_gone(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::ESRCH)
}

/// Cancels `cancel` on the first SIGTERM or SIGINT.
///
/// # Errors
///
/// Returns an error if the handlers cannot be installed.
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            () = cancel.cancelled() => return,
        }
        cancel.cancel();
    }))
}
