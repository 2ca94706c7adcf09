pub mod api;
pub mod auth;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod expand;
pub mod model;
pub mod observability;
pub mod policy;
pub mod store;
pub mod wal;
