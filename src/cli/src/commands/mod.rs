pub mod bundles;
pub mod config;
pub mod health;
