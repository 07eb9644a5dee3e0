//! Topic authorization primitives for the sluice write gateway.
//!
//! # Purpose
//! Defines the actions a principal can take on a topic, the per-topic access
//! control object returned by the metadata directory, and the bearer-token
//! verifier that turns a presented token into an [`Identity`].
//!
//! # How it fits
//! The gateway authenticates a producer's token once per session (and again on
//! every token refresh), then evaluates the cached [`AccessControl`] against the
//! resulting identity before binding a partition and on a periodic timer.
//!
//! # Key invariants
//! - An identity is granted an action if any ACL entry whose subject pattern
//!   matches the identity's subject or one of its groups lists that action.
//! - Tokens are HS256 JWTs; issuer and audience must both match.
//!
//! # Examples
//! ```rust
//! use sluice_authz::{AccessControl, AclEntry, Action, Identity};
//!
//! let acl = AccessControl::new(vec![AclEntry::new("svc-*", vec![Action::TopicWrite])]);
//! assert!(acl.allows(&Identity::new("svc-orders"), Action::TopicWrite));
//! assert!(!acl.allows(&Identity::new("alice"), Action::TopicWrite));
//! ```

mod acl;
mod action;
mod errors;
mod identity;
mod matcher;
mod token;

pub use acl::{AccessControl, AclEntry};
pub use action::Action;
pub use errors::{AuthzError, AuthzResult};
pub use identity::Identity;
pub use matcher::wildcard_match;
pub use token::{SluiceClaims, TokenIssuer, TokenVerifier};
