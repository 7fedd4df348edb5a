//! Runtime controls for the worker loop, driven by Unix signals.
//!
//! Signal handlers only flip flags here; the loop header consumes them. That
//! keeps every state change on the loop's thread and the handlers trivial.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Process-wide worker state shared between the loop and the signal tasks.
///
/// `processing` gates polling: while false the loop sleeps instead of
/// receiving. `reload` and `help` are one-shot requests; `stop` is sticky.
#[derive(Debug)]
pub struct Controls {
    processing: AtomicBool,
    stop: AtomicBool,
    reload: AtomicBool,
    help: AtomicBool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            processing: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            reload: AtomicBool::new(false),
            help: AtomicBool::new(false),
        }
    }
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Flips the processing gate and returns the new value.
    pub fn toggle_processing(&self) -> bool {
        !self.processing.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn request_help(&self) {
        self.help.store(true, Ordering::SeqCst);
    }

    pub fn take_help(&self) -> bool {
        self.help.swap(false, Ordering::SeqCst)
    }
}

/// Binds the control actions to signals: `SIGUSR1` toggles processing,
/// `SIGHUP` reloads configuration, `SIGUSR2` dumps state, and
/// `SIGTERM`/`SIGINT` request a graceful stop.
pub fn install_signal_handlers(controls: Arc<Controls>) -> anyhow::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    {
        let controls = controls.clone();
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                let processing = controls.toggle_processing();
                info!(processing, "toggled processing");
            }
        });
    }
    {
        let controls = controls.clone();
        tokio::spawn(async move {
            while usr2.recv().await.is_some() {
                controls.request_help();
            }
        });
    }
    {
        let controls = controls.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("configuration reload requested");
                controls.request_reload();
            }
        });
    }
    {
        let controls = controls.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => {}
                _ = interrupt.recv() => {}
            }
            info!("stop requested, exiting after current iteration");
            controls.request_stop();
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_processing() {
        let controls = Controls::new();
        assert!(controls.processing());
        assert!(!controls.toggle_processing());
        assert!(!controls.processing());
        assert!(controls.toggle_processing());
        assert!(controls.processing());
    }

    #[test]
    fn reload_and_help_are_one_shot() {
        let controls = Controls::new();
        assert!(!controls.take_reload());
        controls.request_reload();
        assert!(controls.take_reload());
        assert!(!controls.take_reload());

        controls.request_help();
        assert!(controls.take_help());
        assert!(!controls.take_help());
    }

    #[test]
    fn stop_is_sticky() {
        let controls = Controls::new();
        assert!(!controls.stop_requested());
        controls.request_stop();
        assert!(controls.stop_requested());
        assert!(controls.stop_requested());
    }
}
