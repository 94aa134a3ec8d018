//! Turnstile - In-process Rate Limiting Engine
//!
//! This crate implements the admission controller used by a layered
//! user-management backend. Every rate limited operation is tracked per key
//! in an exact sliding-window log, with limits looked up by key pattern.

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
