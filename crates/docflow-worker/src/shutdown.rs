use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flipped once by a signal handler; every poll loop checks it before
/// claiming new work. A second signal after the first is only relevant to
/// an operator watching logs — the loop itself always gives in-flight work
/// the same grace period regardless of how many times the signal fires.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    requested: AtomicBool,
}

impl ShutdownFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

/// Installs Ctrl-C and, on Unix, SIGTERM handlers that both set the shared
/// flag. Either signal starts the same graceful drain; this process does not
/// distinguish a second signal as an immediate-kill request, since the poll
/// loop already bounds in-flight work to a fixed grace period.
pub fn install(flag: Arc<ShutdownFlag>) {
    let ctrl_c_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, draining in-flight work");
            ctrl_c_flag.request();
        }
    });

    #[cfg(unix)]
    {
        let term_flag = flag;
        tokio::spawn(async move {
            let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            if sigterm.recv().await.is_some() {
                tracing::info!("received sigterm, draining in-flight work");
                term_flag.request();
            }
        });
    }
}
