pub mod cli;
pub mod client;
pub mod daemon;
pub mod errors;
pub mod models;
pub mod server;
pub mod storage;
