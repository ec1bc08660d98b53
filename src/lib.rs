pub mod config;
pub mod constants;
pub mod error;
pub mod output;
pub mod particles;
pub mod simulation;
pub mod world_2d;

pub use config::SimulationConfig;
pub use error::{PicError, Result};
pub use simulation::{RunSummary, Simulation};
