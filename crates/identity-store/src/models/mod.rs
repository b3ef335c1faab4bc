//! Identity records persisted by the stores.
//!
//! Entities expose public fields and are plain serde documents. Protocol
//! semantics (what a status or a token type means) belong to the caller;
//! the stores only depend on the well-known values in [`statuses`] and
//! [`authorization_types`].

mod application;
mod authorization;
mod scope;
mod token;

pub use application::Application;
pub use authorization::Authorization;
pub use scope::Scope;
pub use token::Token;

/// Well-known authorization and token statuses.
pub mod statuses {
    /// Still usable.
    pub const VALID: &str = "valid";
    /// Not yet usable.
    pub const INACTIVE: &str = "inactive";
    /// Used once and spent.
    pub const REDEEMED: &str = "redeemed";
    /// Refused by the server.
    pub const REJECTED: &str = "rejected";
    /// Explicitly withdrawn.
    pub const REVOKED: &str = "revoked";
}

/// Well-known authorization types.
pub mod authorization_types {
    /// Created for a single flow and never reused.
    pub const AD_HOC: &str = "ad-hoc";
    /// Kept until revoked.
    pub const PERMANENT: &str = "permanent";
}
