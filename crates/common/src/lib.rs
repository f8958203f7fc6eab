//! Common utilities and types shared across the venue server crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes and the role hierarchy
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for identity-token utilities (validation, claims, constants)
pub mod jwt;
