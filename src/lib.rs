// ABOUTME: Library module for dbslice
// ABOUTME: Exports all core functionality for use in the binary and tests

pub mod adapter;
pub mod anonymize;
pub mod cli;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod cycles;
pub mod emit;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod profiling;
pub mod safety;
pub mod schema;
pub mod seed;
pub mod traverse;
pub mod validate;
