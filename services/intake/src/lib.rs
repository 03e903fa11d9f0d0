pub mod config;
pub mod console;
pub mod script_loader;
