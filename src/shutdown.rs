use tokio::sync::watch;

/// Creates a linked pair of shutdown halves.
///
/// The [`Shutdown`] half belongs to whoever owns the connection; the
/// [`ShutdownListener`] half is consumed by its run loop.
#[must_use]
pub fn channel() -> (Shutdown, ShutdownListener) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    (
        Shutdown { stop_tx, done_rx },
        ShutdownListener { stop_rx, done_tx },
    )
}

/// Requests a graceful stop and awaits its completion.
///
/// Cloneable; any number of holders may call [`stop`](Self::stop)
/// concurrently and each call completes once the run loop has wound down.
#[derive(Clone, Debug)]
pub struct Shutdown {
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Signals the run loop to stop and waits until it has.
    ///
    /// Completes immediately when the run loop is already gone. Calling
    /// this more than once is fine.
    pub async fn stop(&self) {
        // The run loop may already be gone, which is just as stopped.
        let _ = self.stop_tx.send(true);
        self.wait().await;
    }

    /// Waits for the run loop to finish without asking it to.
    pub async fn wait(&self) {
        let mut done = self.done_rx.clone();
        // An error means the listener was dropped, finished either way.
        let _ = done.wait_for(|done| *done).await;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.done_rx.borrow() || self.done_rx.has_changed().is_err()
    }
}

/// The run loop's side of the shutdown handshake.
#[derive(Debug)]
pub struct ShutdownListener {
    stop_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
}

impl ShutdownListener {
    /// Waits until a stop is requested.
    pub async fn triggered(&mut self) {
        // All Shutdown handles dropped means nobody can ask us to stop.
        if self.stop_rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending().await
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Marks the run loop as fully wound down, waking every stop() caller.
    pub fn complete(self) {
        let _ = self.done_tx.send(true);
    }
}
