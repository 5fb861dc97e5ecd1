pub mod app;
pub mod config;
pub mod page;
pub mod registrar;

pub use app::*;
pub use config::*;
pub use page::*;
pub use registrar::*;
