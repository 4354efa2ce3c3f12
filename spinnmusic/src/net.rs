//! UDP transport primitives for the live-spikes link.

pub mod endpoint;
pub mod socket;

pub use endpoint::Endpoint;
pub use socket::UdpSocket;
