pub mod archive;
pub mod cli;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod ordering;
pub mod polling;
pub mod search;
pub mod session;
pub mod settings;
pub mod types;
pub mod validation;
pub mod views;
