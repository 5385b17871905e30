//! Module to control shutdown in tracegen.
//!
//! Tracegen stops for two reasons: every scenario has run to completion or
//! the operator interrupted the process. In both cases scenarios stop building
//! spans and exporters drain what they hold before the runtime exits.
//! Coordinating that is the responsibility of [`Shutdown`].

use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Shutdown`]
pub enum Error {
    /// The mechanism underlaying [`Shutdown`] failed catastrophically.
    #[error("failed to broadcast shutdown: {0}")]
    Tokio(#[from] broadcast::error::SendError<()>),
}

#[derive(Debug)]
/// Mechanism to control shutdown in tracegen.
///
/// Every scenario, and every worker a scenario spawns, holds a clone of this
/// struct.
pub struct Shutdown {
    /// The broadcast sender, singleton for all `Shutdown` instances derived
    /// from the same root `Shutdown`.
    sender: Arc<broadcast::Sender<()>>,

    /// The receive half of the channel used to listen for shutdown. One per
    /// instance.
    notify: broadcast::Receiver<()>,

    /// `true` if the shutdown signal has been received
    shutdown: bool,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a new `Shutdown` instance. There should be only one call to this
    /// function and all subsequent instances should be created through clones.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_snd, shutdown_rcv) = broadcast::channel(1);

        Self {
            sender: Arc::new(shutdown_snd),
            notify: shutdown_rcv,
            shutdown: false,
        }
    }

    /// Receive the shutdown notice. This function will block if a notice has
    /// not already been sent.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }

    /// Check, without waiting, whether the shutdown notice has arrived.
    pub fn try_recv(&mut self) -> bool {
        if !self.shutdown {
            self.shutdown = !matches!(
                self.notify.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            );
        }
        self.shutdown
    }

    /// Send the shutdown signal through to this and all derived `Shutdown`
    /// instances. Returns the number of active instances, or error.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying tokio broadcast
    /// mechanism fails, which happens when no instance is listening.
    pub fn signal(&self) -> Result<usize, Error> {
        Ok(self.sender.send(())?)
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        let notify = self.sender.subscribe();

        Self {
            shutdown: self.shutdown,
            notify,
            sender: Arc::clone(&self.sender),
        }
    }
}
