//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod events;
pub mod range_server;
pub mod socket_guard;
