// Encoding orchestration engine - independent of the CLI

pub mod benchmark;
pub mod capability;
pub mod collab;
pub mod core;
pub mod encode;
pub mod error;
pub mod hardware;
pub mod reduce;
pub mod supervisor;
pub mod worker;

pub use core::*;
pub use encode::{CancelToken, Encoder, ProgressSender};
pub use error::{EngineError, EngineResult};
