pub mod close;
pub mod connection;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod session;
pub mod sweeper;
