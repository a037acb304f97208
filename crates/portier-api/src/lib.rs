// portier-api: Transport boundary for UHPPOTE-style access controllers.
//
// The wire codec lives outside this workspace. This crate pins down what
// the coordinators expect from it: the `Transport` request/reply surface,
// the `EventDecoder` used by the passive listener, and the reply types.

pub mod error;
pub mod listener;
pub mod transport;
pub mod types;

pub use error::Error;
pub use listener::{EventDecoder, ListenerHandle, RebindConfig};
pub use transport::{
    Controller, DEFAULT_PORT, DEFAULT_TIMEOUT, Late, LateReply, LateSender, Protocol, Transport,
    verify,
};
pub use types::{
    Ack, AntiPassback, AntiPassbackInfo, CardCount, CardRecord, CardUpdate, ControllerInfo,
    ControllerTime, Direction, DoorControl, DoorMode, EventRecord, EventReply, EventType,
    Interlock, InterlockInfo, ListenerInfo, Reason, Reply, Status,
};
