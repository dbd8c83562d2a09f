// Kubecc GCC / Clang Toolchain
//
// Classifies compiler command lines and runs them locally, remotely or on
// behalf of a remote consumer.
//
// Key design decisions:
// - Anything that reads or writes host-only files forces a local compile
// - Remote compiles receive preprocessed source, so agents need no headers
// - The agent compiles in a private temporary directory per request

pub mod args;
pub mod controller;
pub mod error;
pub mod filename;
pub mod querier;
pub mod tasks;

// Re-export main types
pub use args::{ActionOpt, CcArgs};
pub use controller::{add_to_store, CcController};
pub use error::ArgsError;
pub use querier::ExecQuerier;
pub use tasks::{CompileRunner, PreprocessRunner};
