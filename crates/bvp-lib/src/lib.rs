pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod signal;
pub mod window;

pub use config::*;
pub use error::*;
pub use signal::*;
