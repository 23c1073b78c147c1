//! Integration test support
//!
//! Spawns real gateways and workers inside the test process against a live
//! Redis, and drives them with raw WebSocket clients. Tests call
//! [`check_test_env`] first and return early when Redis is not reachable.

pub mod fixtures;
pub mod helpers;

pub use fixtures::DocHandle;
pub use helpers::{check_test_env, redis_url, TestClient, TestHarness};
