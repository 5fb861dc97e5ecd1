pub mod orchestrator;
pub mod queue;
pub mod upload;

pub use orchestrator::*;
pub use queue::*;
pub use upload::*;
