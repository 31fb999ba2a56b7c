//! Quote resolvers
//!
//! A resolver owns one logical "current request": the dashboard streams
//! inputs at keystroke rate, the resolver debounces them, funnels fetches
//! through the request coordinator, retries transient failures, and
//! publishes a state snapshot. Errors become state here; nothing is thrown
//! past the resolver boundary.

pub mod cross_chain;
pub mod quote;
pub mod retry;

pub use cross_chain::{CrossChainInput, CrossChainResolver, CrossChainState};
pub use quote::{QuoteInput, QuoteResolver, QuoteState};
pub use retry::RetryPolicy;

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvePhase {
    Idle,
    Validating,
    Fetching,
    Resolved,
    Errored,
}

pub(crate) enum Debounce {
    Elapsed,
    Changed,
    Closed,
}

/// Sleep for the debounce window unless a newer input arrives first.
pub(crate) async fn debounce<T>(rx: &mut watch::Receiver<T>, window: Duration) -> Debounce {
    tokio::select! {
        _ = tokio::time::sleep(window) => Debounce::Elapsed,
        changed = rx.changed() => {
            if changed.is_ok() {
                Debounce::Changed
            } else {
                Debounce::Closed
            }
        }
    }
}
