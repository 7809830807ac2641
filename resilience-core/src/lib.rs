pub mod config;
pub mod error;
pub mod event;
pub mod fault;

pub use config::*;
pub use error::*;
pub use event::*;
pub use fault::*;
