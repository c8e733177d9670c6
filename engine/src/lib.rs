//! The scan lifecycle engine: plan, launch, supervise, and tear down
//! per-node security-benchmark scans across many clusters.

#[macro_use]
extern crate serde_derive;

pub mod args;
pub mod cluster;
pub mod conf;
pub mod controller;
pub mod error;
pub mod launcher;
pub mod models;
pub mod planner;
pub mod store;
pub mod supervisor;
pub mod template;
pub mod utils;

pub use conf::Conf;
pub use controller::Controller;
pub use error::Error;
