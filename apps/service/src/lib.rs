pub mod config;
pub mod diagnosis;
pub mod models;
pub mod monitoring;
pub mod pool;
pub mod registry;
pub mod service;
pub mod validation;
