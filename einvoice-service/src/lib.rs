pub mod adapters;
pub mod cli;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod guards;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod stores;

pub use startup::{AppState, Application};
