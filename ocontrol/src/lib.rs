//! O - instrument control server
//!
//! Serves the instrument command set over the acknowledgement protocol,
//! driving the CCD controller, the filter wheel and ND slides, and the
//! telescope (ISS) and data reduction pipeline (DpRt) it depends on.

pub mod acquisition;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod filter_slide;
pub mod fits;
pub mod handlers;
pub mod hardware;
pub mod keepalive;
pub mod pipeline;
pub mod simulated;
pub mod status;
pub mod telescope;
pub mod wcs;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::*;
pub use handlers::{Services, Shutdown};
