//! CLI command implementations

pub mod config;
pub mod inspect;
pub mod restore;
pub mod verify;

pub use config::execute as config;
pub use inspect::execute as inspect;
pub use restore::execute as restore;
pub use verify::execute as verify;
