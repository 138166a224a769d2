//! Broker provider implementations.
//!
//! This module contains concrete implementations of the `BrokerProvider` and
//! `BrokerConnection` traits.

pub mod memory;

pub use memory::{InMemoryBroker, InMemoryConfig, InMemoryConnection};
