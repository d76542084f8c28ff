//! Value-based approval chains.
//!
//! An [`ApprovalChain`] maps `(document type, amount)` to the role whose
//! authority is needed to approve. Pure lookup; the engine loads tiers from
//! storage and builds a chain per transaction.

pub mod chain;

pub use chain::{ApprovalChain, ApprovalRequirement, ApprovalTier};
