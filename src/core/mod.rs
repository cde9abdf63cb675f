pub mod config;
pub mod document;
pub mod io;
pub mod library;
pub mod state;
