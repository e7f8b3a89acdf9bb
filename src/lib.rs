pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod pose;
pub mod session;
