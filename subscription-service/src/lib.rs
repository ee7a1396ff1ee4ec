pub mod billing;
pub mod config;
pub mod dtos;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod ports;
pub mod services;
pub mod startup;

pub use startup::Application;
