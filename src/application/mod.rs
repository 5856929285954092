//! Application services: catalog reads, writes and asset delivery.

pub mod assets;
pub mod catalog;
pub mod error;
pub mod mutations;
pub mod options;
pub mod repos;
