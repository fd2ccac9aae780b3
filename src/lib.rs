//! Runtime feature flags with ordered targeting rules.
//!
//! # Overview
//!
//! A flag catalog holds [`Flag`]s. Each flag has a set of [`Variation`]s (the possible served
//! outcomes) and an ordered list of targeting [`Rule`]s. Evaluating a flag for a [`Context`] (a
//! map of caller-supplied attributes) yields an [`EvaluationResult`]: whether the flag is on, which
//! variation is served, and why.
//!
//! The [`Client`] is the entry point. It is created from a [`ClientConfig`], which selects the
//! storage backend ([`MemoryStore`], [`FileStore`], or any [`FlagStore`] implementation) and an
//! optional [`EvaluationLogger`] that receives an event for every evaluation.
//!
//! ```
//! # use switchboard::{ClientConfig, Context, NewFlag, NewRule, Reason};
//! let client = ClientConfig::in_memory().to_client();
//! client.create_flag(
//!     NewFlag::new("new-checkout", "New checkout")
//!         .enabled(true)
//!         .variation("control", "v1")
//!         .variation("treatment", "v2"),
//! )?;
//! client.create_rule("new-checkout", NewRule::new("plan", "equals", "premium", 1))?;
//!
//! let context = Context::from([("plan".to_owned(), "premium".to_owned())]);
//! let result = client.evaluate("new-checkout", &context);
//! assert!(result.enabled);
//! assert_eq!(result.variation_value.as_deref(), Some("v2"));
//! assert_eq!(result.reason, Reason::RuleMatch);
//! # Ok::<(), switchboard::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum; [`Error::kind`] classifies them.
//!
//! Admin operations (creating, toggling and deleting flags and rules) return errors to the caller.
//! Evaluation never does: a missing flag, a broken rule, or a storage failure degrades to a
//! disabled result whose reason reads `error: <message>`. Feature flag evaluation should not be
//! critical enough to take a request down.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-value
//! pairs, under the `switchboard` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into catalog operations.
//!
//! # Examples
//!
//! A runnable example lives in `demos/simple/main.rs` (`cargo run --example simple`).

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod admin;
pub mod catalog;
mod client;
mod config;
mod error;
mod eval;
mod evaluation_logger;
mod file_store;
mod rules;
pub mod store;

pub use catalog::{Flag, NewFlag, NewRule, NewVariation, Operator, Rule, RuleId, Variation};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, EvaluationError, Result, StoreError};
pub use eval::{evaluate, evaluate_simple, Context, EvaluationResult, Reason};
pub use evaluation_logger::{EvaluationEvent, EvaluationLogger};
pub use file_store::FileStore;
pub use store::{Catalog, FlagStore, MemoryStore, Transaction};
