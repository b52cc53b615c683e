pub mod base32;
pub mod engine;
pub mod secret;

pub use engine::{generate, generate_secret, otpauth_uri, verify, verify_at, TotpError};
pub use secret::{SecretStore, TotpSecret};
