// Library exports for the operator binaries and tests
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
