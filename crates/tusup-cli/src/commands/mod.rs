//! Command implementations

mod config;
mod offset;
mod upload;

pub use config::show_config;
pub use offset::offset;
pub use upload::upload;
