//! Penumbra - Rule-Based Authorization Service
//!
//! This library provides the core functionality for the Penumbra authorization service:
//! users hold roles, roles carry ordered permission rules, and callers ask whether an
//! action on a subject type is allowed. It exposes all modules for testing purposes.

pub mod ability;
pub mod entities;
pub mod errors;
pub mod identity;
pub mod session;
pub mod settings;
pub mod storage;
pub mod web;
