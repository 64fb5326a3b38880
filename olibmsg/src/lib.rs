//! O Instrument Message Library (olibmsg)
//!
//! This library contains the definitions shared between the instrument
//! server (ocontrol), its clients (olib) and the simulated telescope and
//! pipeline (osim).

pub mod types;
pub mod commands;
pub mod replies;
pub mod protocol;
pub mod error;

pub use types::*;
pub use commands::*;
pub use replies::*;
pub use protocol::*;
pub use error::*;
