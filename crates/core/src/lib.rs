//! Core utilities shared by the bytecode verification crates.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod error;
pub mod utils;

pub use error::{InitializationError, Result, VerifyError, VerifyIoError};
