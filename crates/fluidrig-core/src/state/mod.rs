//! Shared application state.
//!
//! The chip model, compile results, per-program messages and the live
//! task listing sit in one [`ChipState`] behind a [`ChipManager`].
//! Control requests that must run on the update thread travel as
//! [`ControlMessage`]s; everything else is a direct locked access.

mod manager;
mod messages;
mod model;

pub use manager::ChipManager;
pub use messages::ControlMessage;
pub use model::ChipState;
