//! Core types, constants, and collaborator interfaces.
//!
//! This module has no knowledge of the session state machines; it defines
//! the vocabulary shared by the other layers.

mod caps;
mod constants;
mod error;
mod traits;

pub use caps::{CapabilitySet, main_cap};
pub use constants::*;
pub use error::*;
pub use traits::*;
