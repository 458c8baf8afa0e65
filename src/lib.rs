//! A thread-safe hashmap behind a single reader/writer lock, with lock-elided
//! operations for composing atomic multi-step updates.
//!
//! # Overview
//! `rwmap` provides [`ConcurrentMap`], a `HashMap` guarded by one futex-based
//! reader/writer lock. Every operation comes in two flavours:
//! - On `ConcurrentMap` itself, the operation takes the lock (shared for
//!   queries, exclusive for anything that may mutate) and releases it before
//!   returning.
//! - On the [`Store`] behind a [`ReadGuard`] or [`WriteGuard`], the same
//!   operation runs without touching the lock, so a caller holding the guard
//!   can chain several of them into one atomic step.
//!
//! # Features
//! - Many concurrent readers, one exclusive writer, writers are not starved
//! - Lock elision through guards, checked by the borrow checker
//! - Double-checked `insert_or_apply` that never mutates under a shared lock
//! - No poisoning, the lock is released normally on panic
//!
//! # Examples
//! ```
//! use rwmap::ConcurrentMap;
//!
//! let map = ConcurrentMap::<String, u32>::new();
//!
//! // Basic operations
//! map.insert("key1".into(), 42);
//! assert_eq!(map.get("key1"), Some(42));
//! map.apply_for_key("key1", |v| *v += 1);
//! assert_eq!(map.get("key1"), Some(43));
//!
//! // Compose a check-then-insert under one exclusive lock
//! {
//!     let mut store = map.write();
//!     if !store.contains_key("key2") {
//!         store.insert("key2".into(), 123);
//!     }
//! }
//!
//! // Remove a value
//! assert_eq!(map.erase("key1"), Some(43));
//! assert_eq!(map.get("key1"), None);
//! assert_eq!(map.len(), 1);
//! ```
#[doc = include_str!("../README.md")]
mod concurrent_map;
mod futex;
mod store;

pub use concurrent_map::*;
pub use store::*;
