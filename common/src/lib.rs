// Common library for shared code across the updater binary and its tests

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod queue;
pub mod schedule;
pub mod sidechannel;
pub mod telemetry;
pub mod updater;
