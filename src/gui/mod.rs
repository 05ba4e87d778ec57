//! Terminal widgets used by the binaries.

mod device_selector;
mod error;

pub use device_selector::{device_selector, resolve_port};
pub use error::SelectorError;
