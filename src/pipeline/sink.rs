//! Single-fire completion sink.

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::router::Outcome;

enum Target {
    Channel(oneshot::Sender<Outcome>),
    Callback(Box<dyn FnOnce(Outcome) + Send>),
}

/// Delivers exactly one [`Outcome`] for a call.
///
/// [`Completion::complete`] consumes the sink, so a second delivery is a
/// compile error. A sink dropped without firing is logged; channel receivers
/// also observe it as a closed channel.
pub struct Completion {
    method: String,
    target: Option<Target>,
}

impl Completion {
    /// Sink backed by a oneshot channel.
    #[must_use]
    pub fn channel(method: impl Into<String>) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            method: method.into(),
            target: Some(Target::Channel(tx)),
        };
        (sink, rx)
    }

    /// Sink that invokes `callback` with the outcome.
    #[must_use]
    pub fn callback(
        method: impl Into<String>,
        callback: impl FnOnce(Outcome) + Send + 'static,
    ) -> Self {
        Self {
            method: method.into(),
            target: Some(Target::Callback(Box::new(callback))),
        }
    }

    pub fn complete(mut self, outcome: Outcome) {
        match self.target.take() {
            Some(Target::Channel(tx)) => {
                if tx.send(outcome).is_err() {
                    debug!(method = %self.method, "Caller went away before completion");
                }
            }
            Some(Target::Callback(callback)) => callback(outcome),
            None => {}
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.target.is_some() {
            warn!(method = %self.method, "Completion dropped without an outcome");
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("method", &self.method)
            .field("fired", &self.target.is_none())
            .finish()
    }
}
