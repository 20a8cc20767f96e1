// Clearhouse daemon library
// Exposes internal modules for integration testing

#[macro_use]
extern crate log;

pub mod auth;
pub mod chain;
pub mod config;
pub mod core;
pub mod notifier;
pub mod rpc;
