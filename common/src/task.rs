use std::future::Future;

use log::{debug, error};
use tokio::task::JoinHandle;

/// Spawn a named background task and log its lifecycle.
/// The name shows up in logs only; tokio task names are unstable.
pub fn spawn_task<F>(name: &'static str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    debug!("Spawning task '{}'", name);
    tokio::spawn(async move {
        let output = future.await;
        debug!("Task '{}' has exited", name);
        output
    })
}

/// Spawn a named task whose output is a Result; errors are logged and dropped.
pub fn spawn_fallible_task<F, E>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    debug!("Spawning task '{}'", name);
    tokio::spawn(async move {
        if let Err(e) = future.await {
            error!("Task '{}' has exited with an error: {}", name, e);
        } else {
            debug!("Task '{}' has exited", name);
        }
    })
}
