//! Network transport for the HTTP stream server.
//!
//! - **TCP** ([`tcp`]): one thread per client connection. Each connection
//!   carries a single request; a stream request keeps its thread busy
//!   writing frames until the client goes away or the server stops.

pub mod tcp;

pub use tcp::ConnectionContext;
