pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ipc;
pub mod scheduler;
pub mod settings;
pub mod storage;

pub use config::AppConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use ipc::{DaemonClient, DaemonServer};
