//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider` trait
//! for different queue backends.

pub mod azure;
pub mod memory;

pub use azure::{AzureError, AzureStorageProvider};
pub use memory::InMemoryProvider;
