pub mod auth;
pub mod keys;
pub mod policy;

pub use auth::verify_api_key;
pub use keys::{ApiKeyStore, KeyRecord};
pub use policy::{Decision, PolicyGate};

/// Constant-time equality comparison for secret strings.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
