pub mod ask;
pub mod config;
pub mod keys;
pub mod models;
