//! Skiff library
//!
//! Session transport for remote dev instances: pinned-TLS channel
//! upgrade, framed terminal multiplexing, byte relays, and the SOCKS
//! ProxyCommand bridge.

pub mod channel;
pub mod cli;
pub mod frame;
pub mod relay;
pub mod socks;
pub mod term;
pub mod tls;
