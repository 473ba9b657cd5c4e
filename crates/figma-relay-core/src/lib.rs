//! Shared pieces of the Figma relay: the JSON frame protocol spoken over the
//! relay, the command-name catalogue, and the table that turns relayed
//! replies back into awaitable results.

pub mod commands;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod timeouts;

pub use commands::FigmaCommand;
pub use error::{CorrelationError, DispatchError};
pub use pending::{mint_id, Outcome, PendingConfig, PendingHandle, PendingTable};
pub use protocol::{ProgressStatus, ProgressUpdate};
pub use timeouts::{TimeoutPolicy, TimeoutTable};
