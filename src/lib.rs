pub mod abi;
pub mod blockchain;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod flow;
pub mod history;
pub mod models;
pub mod scheduler;
pub mod simulation;
pub mod submitter;

pub use connection::ConnectionHandle;
