//! Catalog cache, stable-id storage indirection and singleflight asset
//! resizing for a self-hosted publishing backend.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
