//! Integration test suite for Vesta.
//!
//! The tests drive a full in-memory [`vesta_node::Deployment`] through lock
//! lifecycles and reward weeks, and check the accounting invariants under
//! randomized call sequences.

pub mod helpers;
