pub mod chemistry;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod spatial;
