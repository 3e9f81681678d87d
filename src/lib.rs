//! # hardshell - Host Compliance Auditing and Hardening
//!
//! hardshell evaluates a Linux host against a declarative rule set (loaded
//! kernel modules, kernel parameters, file permissions, installed packages,
//! config-file contents, service enablement) and, in harden mode, remediates
//! failing rules by rewriting system configuration files.
//!
//! ## Core Concepts
//!
//! - **Rules**: a tree of categories, sub-categories and checks
//! - **Modes**: `audit` only reads host state; `harden` fixes, then reads
//! - **Handlers**: one per check type, each producing PASS/FAIL/SKIP/WARN/ERROR
//! - **Reconciliation**: making one `key=value` line authoritative across a
//!   directory of `.conf` files without duplicating it
//! - **Status tree**: outcomes collected in the shape of the rule tree
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Rules document + [global]                        │
//! │                   (TOML / YAML / JSON, validated)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          RuleDispatcher                              │
//! │             (skip / mode / OS gating, one check at a time)           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │  CommandRunner  │   │      FileProbe      │   │ SettingsReconciler  │
//! │ (lsmod, sysctl, │   │  (stat, ownership,  │   │ (comment conflicts, │
//! │  systemctl ...) │   │    content type)    │   │   append, rename)   │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  StatusTree  →  human / JSON report                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hardshell::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let document = hardshell::config::read_document("hardshell.toml".as_ref())?;
//!     let config = Config::from_document(&document)?;
//!     let tree = RuleTree::from_document(&document)?;
//!     let os = OsDescriptor::detect()?;
//!
//!     let dispatcher = RuleDispatcher::new(Arc::new(LocalRunner::new()), config);
//!     let status = dispatcher.evaluate(Mode::Audit, &os, &tree).await;
//!     println!("{:?}", status.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod os;
pub mod output;
pub mod probe;
pub mod reconcile;
pub mod rules;
pub mod runner;
pub mod status;

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::Config;
    pub use crate::dispatcher::RuleDispatcher;
    pub use crate::error::{Error, Result};
    pub use crate::os::OsDescriptor;
    pub use crate::reconcile::SettingsReconciler;
    pub use crate::rules::{Check, CheckKind, Mode, RuleTree};
    pub use crate::runner::{CommandResult, CommandRunner, LocalRunner};
    pub use crate::status::{CheckOutcome, CheckStatus, StatusTree};
}

/// Version of the hardshell library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
