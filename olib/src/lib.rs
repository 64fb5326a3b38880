//! O Instrument Client Library (olib)
//!
//! This library provides the client side of the acknowledgement protocol:
//! framed TCP connections, sub-command forwarding to the telescope and the
//! data pipeline, and a high-level client for the instrument server.

pub mod client;
pub mod connection;

pub use client::*;
pub use connection::*;
pub use olibmsg::*;
