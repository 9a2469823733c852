mod analysis;
mod config;
mod entry;
mod handlers;
mod state;
mod text;

pub use entry::run;
