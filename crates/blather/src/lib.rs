//! `blather` — a local-host chat service transported entirely over named
//! pipes. See `server` and `client` for the two halves of the protocol, and
//! `wire` for the fixed-layout records that flow between them.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod selfpipe;
pub mod server;
pub mod wire;
