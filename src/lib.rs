pub mod config;
pub mod driver;
pub mod exec;
pub mod fault;
pub mod locate;
pub mod lock;
pub mod monitor;
pub mod orchestrator;
pub mod recovery;
pub mod upload;
pub mod utils;
