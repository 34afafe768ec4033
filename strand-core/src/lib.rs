//! Strand Core
//!
//! This crate provides a fine-grained reactive state runtime. It implements:
//!
//! - A key/value store with batched writes and once-per-flush notification
//! - Atoms, selects and derived values with automatic dependency tracking
//! - Path accessors for granular subscriptions inside structured values
//! - Store definitions with group-prefixed keys
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The store, its members and dependency tracking
//! - `config`: Store and path accessor configuration
//! - `error`: The crate-wide error type
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use strand_core::reactive::{atom, select, Store};
//!
//! let count = atom(1);
//! let doubled = select({
//!     let count = count.clone();
//!     move |_: &()| Ok(json!(count.get()?.as_i64().unwrap_or(0) * 2))
//! });
//!
//! let store = Store::builder()
//!     .atom("count", &count)
//!     .select("doubled", &doubled)
//!     .build()?;
//!
//! doubled.sub(&(), || println!("doubled changed"))?;
//!
//! count.set(5)?;
//! store.flush();
//! // Prints "doubled changed"; doubled.get(&()) is now 10.
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::{PathOptions, StoreConfig};
pub use error::{Error, Result};
pub use reactive::{atom, derived, select, Atom, Derived, PathAccessor, Select, Store};
