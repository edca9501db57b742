pub mod config;
pub mod error;

pub use config::{load_dotenv, PipelineSection, QueueSection, RuntimeConfig};
pub use error::*;
