//! JSON RPC surface for gitmesh: a single `dispatch(request) -> response`
//! entry point a host process (Node addon, CLI, test harness) can drive
//! over any transport it likes. `bin/gitmesh-host.rs` wires this up to
//! stdio as the reference harness.

pub mod dispatch;
pub mod error;
pub mod event_io;
pub mod types;

pub use dispatch::{dispatch, Engine, Response};
pub use error::{DispatchError, ErrorPayload};
pub use event_io::{AdapterEventSource, EventFilters, EventIoAdapter, PublishOutcome};
pub use types::{FileWrite, ProgressFields, ProgressMessage, Request, SafePushOptionsPayload};
