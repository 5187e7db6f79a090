//! Signal handling for the daemon.
//!
//! Unix signals play the role of the board's external events:
//!
//! | Signal | Effect |
//! |--------|--------|
//! | SIGINT, SIGTERM | stop after the current sweep |
//! | SIGHUP | reboot after the current sweep (config is reloaded) |
//! | SIGUSR1 | raise the `button` interrupt flag |
//!
//! The OS handler only sets a bit in a static atomic. A forwarding thread
//! turns pending bits into [`ControlHandle`] requests and flag raises, so the
//! sweep never observes a signal in the middle of a body.

use oasis_runtime::interrupt::InterruptFlag;
use oasis_runtime::service::ControlHandle;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bits set by the OS handler, one per [`SignalKind`].
static PENDING: AtomicU32 = AtomicU32::new(0);

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP - Reboot and reload configuration.
    Hangup,
    /// SIGUSR1 - Simulated button press.
    User1,
}

impl SignalKind {
    const ALL: [SignalKind; 4] = [
        SignalKind::Terminate,
        SignalKind::Interrupt,
        SignalKind::Hangup,
        SignalKind::User1,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
            SignalKind::User1 => write!(f, "SIGUSR1"),
        }
    }
}

/// Where each signal goes.
#[derive(Debug)]
struct SignalRoutes {
    control: ControlHandle,
    button: InterruptFlag,
    signal_count: AtomicU32,
}

impl SignalRoutes {
    fn dispatch(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        match kind {
            SignalKind::Terminate | SignalKind::Interrupt => {
                info!(signal = %kind, "Stop signal received");
                self.control.request_stop();
            }
            SignalKind::Hangup => {
                info!(signal = %kind, "Reboot signal received");
                self.control.request_reboot();
            }
            SignalKind::User1 => {
                debug!(signal = %kind, flag = self.button.name(), "Raising interrupt flag");
                self.button.raise();
            }
        }
    }

    fn dispatch_pending(&self, pending: u32) {
        for kind in SignalKind::ALL {
            if pending & kind.bit() != 0 {
                self.dispatch(kind);
            }
        }
    }
}

/// Handle for signal management.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    routes: Arc<SignalRoutes>,
}

impl SignalHandler {
    /// Create a handler and register the OS signal handlers.
    ///
    /// On non-Unix platforms no OS handler is installed.
    pub fn new(control: ControlHandle, button: InterruptFlag) -> std::io::Result<Self> {
        let handler = Self::detached(control, button);

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    /// Create a handler without touching the process signal table.
    fn detached(control: ControlHandle, button: InterruptFlag) -> Self {
        Self {
            routes: Arc::new(SignalRoutes {
                control,
                button,
                signal_count: AtomicU32::new(0),
            }),
        }
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        extern "C" fn on_signal(signal: c_int) {
            let kind = match signal {
                libc::SIGTERM => SignalKind::Terminate,
                libc::SIGINT => SignalKind::Interrupt,
                libc::SIGHUP => SignalKind::Hangup,
                libc::SIGUSR1 => SignalKind::User1,
                _ => return,
            };
            PENDING.fetch_or(kind.bit(), Ordering::AcqRel);
        }

        let routes = Arc::clone(&self.routes);
        std::thread::Builder::new()
            .name("oasis-signals".into())
            .spawn(move || loop {
                let pending = PENDING.swap(0, Ordering::AcqRel);
                if pending != 0 {
                    routes.dispatch_pending(pending);
                }
                if routes.control.stop_requested() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        for signal in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP, libc::SIGUSR1] {
            // SAFETY: `on_signal` only performs an atomic read-modify-write,
            // which is async-signal-safe.
            let previous = unsafe { libc::signal(signal, on_signal as libc::sighandler_t) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Total signals routed.
    pub fn signal_count(&self) -> u32 {
        self.routes.signal_count.load(Ordering::Relaxed)
    }
}
