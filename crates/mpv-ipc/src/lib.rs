//! Client for a media player's JSON IPC socket.
//!
//! The player speaks newline-delimited JSON over a unix domain socket:
//!
//! - outbound: `{"command": [<name>, <args...>], "request_id": <int>}`
//! - response: `{"error": "success", "request_id": <int>, "data": <any>}`
//! - event:    `{"event": "property-change", "name": <property>, "data": <any>}`
//!
//! [`Dispatcher`] owns the single connection and multiplexes correlated requests
//! with property-change events. [`Supervisor`] keeps a player process and its
//! dispatcher alive across crashes through [`run_until_cancelled`].

pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod restart;
pub mod supervisor;

pub use dispatcher::Dispatcher;
pub use error::IpcError;
pub use frame::{Decoder, Decoders, FrameReader};
pub use protocol::{ObservePropertyResponse, Request, Response};
pub use restart::run_until_cancelled;
pub use supervisor::{PlayerCommand, Supervisor, SupervisorEvent};
