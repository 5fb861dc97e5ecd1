pub mod error;
pub mod memory;
pub mod merge;
pub mod traits;

pub use error::*;
pub use memory::*;
pub use merge::*;
pub use traits::*;
