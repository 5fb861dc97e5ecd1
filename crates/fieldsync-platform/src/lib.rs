//! In-process model of the host platform: open pages, the deferred-sync
//! scheduler, and background worker lifecycle dispatch. Pages and the worker
//! only ever talk through this layer, never by calling each other.

pub mod clients;
pub mod error;
pub mod events;
pub mod host;
pub mod sync;

pub use clients::*;
pub use error::*;
pub use events::*;
pub use host::*;
pub use sync::*;
