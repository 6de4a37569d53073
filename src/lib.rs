pub mod chord;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod storage;
