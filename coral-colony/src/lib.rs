#![doc = include_str!("../README.md")]
//!

pub mod agent_client;
pub mod app_context;
pub mod ca;
mod colony;
pub mod colony_dir;
pub mod discovery;
pub mod error;
pub mod mesh_server;
pub mod pollers;
pub mod public_server;
pub mod query;
pub mod registry;
mod shared;
pub mod store;
pub mod wire;

pub use app_context::AppContext;
pub use colony::Colony;
pub use colony_dir::{ColonyConfig, MockColonyDir, PersistentColonyDir};
pub use error::{Error, ErrorKind};
