// Re-export of the async runtime so every crate in the workspace spawns
// through one place.

pub use ::tokio::*;

use std::future::Future;

use ::tokio::task::JoinHandle;

/// Spawn a named long-running task. The name keeps spawn sites greppable
/// and shows up in trace logs.
pub fn spawn_task<F>(name: &'static str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    log::trace!("spawning task '{}'", name);
    ::tokio::spawn(future)
}
