pub mod api;
pub mod config;
pub mod curriculum;
pub mod error;
pub mod learning;
pub mod server;
pub mod user;
pub mod utils;

#[cfg(test)]
mod testing;
