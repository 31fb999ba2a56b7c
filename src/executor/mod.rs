//! Swap/bridge execution
//!
//! The state machine that turns a confirmed quote into on-chain reality:
//! approval, source-chain submission, and detached completion polling with
//! explicit teardown.

pub mod machine;
pub mod polling;

pub use machine::{BridgeTransaction, ExecutionStatus, SwapExecutor, SwapParams};
pub use polling::{PollHandle, PollOutcome};
