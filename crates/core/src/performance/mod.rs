pub mod error;
pub mod job;
pub mod returns;
pub mod scorer;

pub use error::PerformanceError;
