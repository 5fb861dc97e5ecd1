pub mod hashing;
pub mod ids;
pub mod messages;
pub mod model;
pub mod time;
pub mod transitions;
pub mod types;

pub use hashing::*;
pub use ids::*;
pub use messages::*;
pub use model::*;
pub use time::*;
pub use transitions::*;
pub use types::*;
