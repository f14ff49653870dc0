#[macro_use]
extern crate lazy_static;
extern crate tracing;

pub mod cli;
pub mod engine;
pub mod logger;
pub mod server;
pub mod session;
pub mod settings;
