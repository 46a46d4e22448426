//! Background actors for the bulk update queue.
//!
//! # Architecture
//!
//! - `DispatcherActor` - Polls the queue and runs one job at a time through a
//!   [`JobProcessor`]
//! - `CleanupActor` - Periodically evicts finished jobs and idle connections
//!
//! # Usage
//!
//! ```ignore
//! use actors::{DispatcherArgs, DispatcherMessage, start_dispatcher};
//!
//! let (dispatcher, handle) = start_dispatcher(DispatcherArgs::new(queue, hub, processor)).await?;
//!
//! // Later: stop after the in-flight job.
//! dispatcher.send_message(DispatcherMessage::Shutdown)?;
//! handle.await?;
//! ```

mod cleanup;
mod dispatcher;
mod handler;
mod messages;

pub use cleanup::{CleanupActor, CleanupArgs, CleanupConfig, start_cleanup};
pub use dispatcher::{
    DispatcherActor, DispatcherArgs, DispatcherConfig, DispatcherState, INTERRUPTED_DETAIL,
    start_dispatcher,
};
pub use handler::{FnProcessor, JobProcessor, ProcessFuture, ProcessResult};
pub use messages::{CleanupMessage, CleanupReport, DispatcherMessage};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
