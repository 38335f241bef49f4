//! Interactive terminal sessions.
//!
//! This module bridges a browser terminal to a shell on the host:
//!
//! - [`session`]: PTY allocation, shell lifecycle and idempotent teardown
//! - [`relay`]: the two concurrent pumps between the PTY and the client
//! - [`registry`]: live session bookkeeping and the session limit

pub mod registry;
pub mod relay;
pub mod session;

pub use registry::{SessionRegistry, SessionSlot};
pub use relay::{
    FrameEncoder, InboundExit, InputSource, OutboundExit, OutputFrame, OutputSink, PtyInput,
    ReadEnd, Relay, RelayError, RelayReport, RelayTrigger,
};
pub use session::{CloseOutcome, PtyIo, PtySession, SessionError, SessionId, SessionState};
