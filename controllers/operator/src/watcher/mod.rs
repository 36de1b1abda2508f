//! Watch loops feeding the cooldown queues.
//!
//! - [`SelfHealingWatch`]: one streaming watch, reopened forever with backoff
//! - [`WatchPool`]: many self-healing watches fanned into one queue
//! - [`GenericResourceWatch`]: periodic paginated listing with a resume marker
//! - [`CommandWatcher`]: initial list plus retried watch of `OperatorCommand`s,
//!   fanned out exactly once to every registered receiver

pub mod commands;
pub mod generic;
pub mod pool;
pub mod self_healing;

pub use commands::CommandWatcher;
pub use generic::GenericResourceWatch;
pub use pool::WatchPool;
pub use self_healing::SelfHealingWatch;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness of the registered watches, read by `/readyz`
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    flags: Arc<Mutex<Vec<(String, Arc<AtomicBool>)>>>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch that is not ready yet
    pub fn register(&self, name: impl Into<String>) -> ReadyFlag {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().push((name.into(), Arc::clone(&flag)));
        ReadyFlag(flag)
    }

    /// True once every registered watch reported ready
    pub fn is_ready(&self) -> bool {
        self.flags.lock().iter().all(|(_, f)| f.load(Ordering::Acquire))
    }

    /// Names of the watches that are not ready yet
    pub fn pending(&self) -> Vec<String> {
        self.flags
            .lock()
            .iter()
            .filter(|(_, f)| !f.load(Ordering::Acquire))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Set once by a watch after it first connected
#[derive(Debug, Clone)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
