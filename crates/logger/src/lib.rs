//! Process-wide logging setup shared by the sentinel binaries.

mod subscriber;

pub use subscriber::{InitError, init, try_init_with_level};
