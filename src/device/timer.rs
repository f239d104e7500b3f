use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// One-shot deferred action. At most one is pending: arming again cancels the previous one.
#[derive(Debug, Default)]
pub struct AutoDisconnectTimer {
    cancel: Option<CancellationToken>,
}

impl AutoDisconnectTimer {
    pub fn new() -> Self {
        AutoDisconnectTimer { cancel: None }
    }

    pub fn arm<F>(&mut self, duration: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = sleep(duration) => on_fire(),
            }
        });
    }

    /// Safe to call when nothing is armed.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| !cancel.is_cancelled())
    }
}

impl Drop for AutoDisconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
