//! Identity validation at connection upgrade and the guard chain applied
//! before privileged procedures.

pub mod guards;
pub mod identity;

pub use guards::{check_guards, Guard, GuardContext};
pub use identity::{extract_token, Identity, IdentityValidator};
