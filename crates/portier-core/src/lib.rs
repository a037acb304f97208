//! Polling coordination and event reconciliation for fleets of access
//! controllers.
//!
//! This crate turns lossy, per-controller request/reply exchanges into a
//! consistent, staleness-aware view of controllers, doors and cards:
//!
//! - **[`Registry`]**: Composition root. Owns one coordinator per entity
//!   kind and the shared store; [`start()`](Registry::start) spawns the
//!   periodic poll tasks, the late-reply merger and the passive event
//!   listener, [`shutdown()`](Registry::shutdown) joins them.
//!
//! - **Coordinators** ([`ControllerCoordinator`], [`DoorCoordinator`],
//!   [`CardCoordinator`], [`EventCoordinator`]): each runs a bounded
//!   cycle with at most [`MAX_IN_FLIGHT`] requests outstanding, merges
//!   replies into the store, and exposes the writes for its entity kind.
//!
//! - **[`DataStore`]**: Reactive storage built on `EntityCollection<K, T>`
//!   (`DashMap` + `tokio::sync::watch` channels) with per-entity event
//!   history.
//!
//! - **[`EntityStream<T>`]**: Subscription handle vended by the
//!   `DataStore`. Exposes `current()` / `latest()` / `changed()`.
//!
//! - **Domain model** ([`model`]): `ControllerState`, `DoorState`,
//!   `CardState` and `Event`, with every attribute held in a [`Tracked`]
//!   cell.
//!
//! The wire codec is not part of this crate: it plugs in through
//! [`portier_api::Transport`] and [`portier_api::EventDecoder`].

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod model;
pub mod registry;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, CycleTimeouts, DoorConfig, PollIntervals, RegistryConfig};
pub use coordinator::{
    CardCoordinator, ControllerCoordinator, DoorCoordinator, EventCoordinator, MAX_CATCH_UP,
    MAX_IN_FLIGHT,
};
pub use directory::{Directory, DoorRef};
pub use error::CoreError;
pub use registry::Registry;
pub use store::{Component, DataStore};
pub use stream::{EntityStream, EventFilter, EventSubscription};

// Re-export model types at the crate root for ergonomics.
pub use model::{CardState, ControllerState, DoorState, Event, EventBuffer, Tracked};
