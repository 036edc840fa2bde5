pub mod config;
pub mod quote;
pub mod task;
pub mod timer;

use serde::Serialize;
use tokio::task::JoinHandle;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One JSON object per line, for streamed events.
pub(crate) fn print_line<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Wait for a detached remote write so it is not cut off at exit.
pub(crate) async fn settle(pending: Option<JoinHandle<()>>) {
    if let Some(handle) = pending {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "remote write task failed");
        }
    }
}
