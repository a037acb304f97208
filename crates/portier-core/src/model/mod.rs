// ── Domain model ──
//
// Last-known state of every managed entity as merged from controller
// replies. Each attribute is a `Tracked` cell so consumers can tell a value
// that was never observed from one that is merely old.

pub mod card;
pub mod controller;
pub mod door;
pub mod event;
pub mod tracked;

// ── Re-exports ──────────────────────────────────────────────────────

pub use card::CardState;
pub use controller::ControllerState;
pub use door::DoorState;
pub use event::{EVENT_BUFFER_CAPACITY, Event, EventBuffer};
pub use tracked::Tracked;
