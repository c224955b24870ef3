pub mod checks;
pub mod config;
pub mod controllers;
pub mod reconcile;
pub mod telemetry;
