//! Small shared utilities for the collector services.

mod retry;
mod sigv4;
mod version;

pub use self::retry::*;
pub use self::sigv4::*;
pub use self::version::*;
