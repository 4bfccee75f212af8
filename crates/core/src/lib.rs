//! Cartage Core - Shared types library.
//!
//! This crate provides common types used across Cartage components:
//! - `api` - The commerce backend (cart, warehouses, catalog, accounts)
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no store access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs and email addresses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
