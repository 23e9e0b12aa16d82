//! ssokube library.
//!
//! Signs in through AWS IAM Identity Center with the device authorization
//! flow, discovers EKS clusters across accounts and regions, and writes
//! kubeconfig contexts for them.
//!
//! # Example
//!
//! ```ignore
//! use ssokube::config::AppConfig;
//! use ssokube::commands::{Context, ScopeArgs};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = Context::new(AppConfig::load(None)?, true)?;
//!     let resolved = ScopeArgs::default().resolve(&ctx)?;
//!     println!("scanning {:?}", resolved.request.regions);
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await
#![allow(clippy::unused_async)]
// Command structs document their flags, not their errors
#![allow(clippy::missing_errors_doc)]

pub mod auth;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod pool;
pub mod provision;
pub mod retry;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ErrorKind, Result};
