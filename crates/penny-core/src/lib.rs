pub mod config;
pub mod constants;
pub mod error;
pub mod responses;

pub use config::PennyConfig;
pub use error::{PennyError, Result};
