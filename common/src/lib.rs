// Common library shared by the scheduler, API server and CLI

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod cycle;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
pub mod watchlist;
