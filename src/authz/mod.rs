//! Permission Resolver: role-derived grants merged with per-principal
//! overrides, plus scope-qualified access levels.
//!
//! The resolver is a pure read path over the grant store. Storage failures
//! and unresolvable identities both resolve to denial; only malformed input
//! surfaces as an error, since it indicates a programming mistake upstream
//! rather than a security decision.

pub mod models;
pub mod resolver;

pub use models::{AccessLevel, EffectivePermission, ResolverError};
pub use resolver::{OverrideOutcome, PermissionResolver};
