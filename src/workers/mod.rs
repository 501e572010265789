//! Worker contract
//!
//! A worker is an external collaborator that receives a `ResponseContext`
//! and writes a response through it. Business logic for any given worker is
//! out of scope for this design (§1); only the contract and registry are.

pub mod echo;
pub mod guess;

use std::collections::HashMap;

use crate::context::{ResponseContext, Sink};
use crate::error::ServerError;

/// The worker contract: consume request parameters, optionally mutate
/// persistent/temporary parameters, and write a response. Must not mutate
/// header-affecting fields after its first write — `ResponseContext` itself
/// enforces that with `ContextLocked`.
pub trait Worker: Send + Sync {
    fn process(&self, ctx: &mut ResponseContext<Sink>) -> Result<(), ServerError>;
}

/// Maps worker identifiers (registered by name or resolved from `/ext/...`)
/// to their implementation. Built once at startup and treated as immutable
/// thereafter, matching the MIME table's lifecycle.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Box<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, identifier: impl Into<String>, worker: Box<dyn Worker>) {
        self.workers.insert(identifier.into(), worker);
    }

    pub fn get(&self, identifier: &str) -> Option<&dyn Worker> {
        self.workers.get(identifier).map(AsRef::as_ref)
    }

    /// Register the bundled demo workers under their conventional
    /// identifiers (`echo`, `guess-number`).
    pub fn with_demo_workers() -> Self {
        let mut reg = Self::new();
        reg.register("echo", Box::new(echo::EchoWorker));
        reg.register("guess-number", Box::new(guess::GuessNumberWorker));
        reg
    }
}
