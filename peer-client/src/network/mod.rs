pub mod client;
pub mod session;
pub mod tcp;
pub mod transport;
