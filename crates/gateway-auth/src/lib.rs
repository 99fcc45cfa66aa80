//! Token & identity service (C3): issue/validate/revoke opaque bearer
//! tokens, replay detection, and the activation-link onboarding flow.

pub mod activation;
pub mod nonce;
pub mod role_template;
pub mod token;

pub use activation::{ActivationRateLimiter, ActivationService};
pub use nonce::NonceLedger;
pub use role_template::RoleTemplate;
pub use token::{hash_token_with_pepper, IssuedToken, TokenIdentityService};
