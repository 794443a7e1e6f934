//! External-process backend: the `dsc` resource runner and its JSON lines.
pub mod adapter;
pub mod protocol;

pub use adapter::{DSC_EXECUTABLE, DscBackend, DscExecutable};
