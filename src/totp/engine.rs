//! RFC 6238 `TOTP` (HMAC-SHA1, 6 digits, 30 second steps).

use super::base32;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng};
use regex::Regex;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const PERIOD_SECONDS: u64 = 30;
pub const DIGITS: usize = 6;
pub const DEFAULT_WINDOW: u64 = 1;
pub const SECRET_LENGTH: usize = 16;
const MODULUS: u32 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("HMAC key rejected: {0}")]
    Key(#[from] hmac::digest::InvalidLength),
}

/// Submitted codes must be exactly six ASCII digits.
#[must_use]
pub fn valid_code_format(code: &str) -> bool {
    Regex::new(r"^[0-9]{6}$").is_ok_and(|re| re.is_match(code))
}

/// Current 30 second step since the Unix epoch.
#[must_use]
pub fn current_step() -> u64 {
    step_at(Utc::now().timestamp())
}

/// Time step for a Unix timestamp; times before the epoch map to step 0.
#[must_use]
pub fn step_at(unix_seconds: i64) -> u64 {
    u64::try_from(unix_seconds).map_or(0, |secs| secs / PERIOD_SECONDS)
}

/// Compute the code for `time_step`.
///
/// # Errors
/// Returns an error if the HMAC cannot be keyed with the decoded secret.
pub fn generate(secret: &str, time_step: u64) -> Result<u32, TotpError> {
    let key = base32::decode(secret);
    let mut mac = HmacSha1::new_from_slice(&key)?;
    mac.update(&time_step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0F);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7F,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    Ok(binary % MODULUS)
}

/// Zero-padded display form of a code.
#[must_use]
pub fn format_code(code: u32) -> String {
    format!("{code:0width$}", width = DIGITS)
}

/// Verify `code` against the current time step.
#[must_use]
pub fn verify(secret: &str, code: &str, window: u64) -> bool {
    verify_at(secret, code, window, current_step())
}

/// Verify `code` against `time_step` and its `window` neighbours on each side.
///
/// Anything that is not exactly six ASCII digits is rejected without computing
/// a single code.
#[must_use]
pub fn verify_at(secret: &str, code: &str, window: u64, time_step: u64) -> bool {
    let code = code.trim();
    if !valid_code_format(code) {
        return false;
    }

    let first = time_step.saturating_sub(window);
    let last = time_step.saturating_add(window);

    (first..=last).any(|step| {
        generate(secret, step).is_ok_and(|candidate| format_code(candidate) == code)
    })
}

/// Generate a fresh 16 symbol base32 secret.
#[must_use]
pub fn generate_secret() -> String {
    let mut rng = OsRng;
    (0..SECRET_LENGTH)
        .map(|_| char::from(base32::ALPHABET[rng.gen_range(0..base32::ALPHABET.len())]))
        .collect()
}

/// Build the `otpauth://` URI understood by authenticator apps.
#[must_use]
pub fn otpauth_uri(issuer: &str, account: &str, secret: &str) -> String {
    let issuer: String = url::form_urlencoded::byte_serialize(issuer.as_bytes()).collect();
    let account: String = url::form_urlencoded::byte_serialize(account.as_bytes()).collect();
    format!("otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use totp_rs::{Algorithm, TOTP};

    // RFC 6238 appendix B seed, "12345678901234567890" in ASCII
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const DEMO_SECRET: &str = "JBSWY3DPEHPK3PXP";

    fn reference(secret: &str, time_step: u64) -> String {
        let totp = TOTP::new_unchecked(
            Algorithm::SHA1,
            DIGITS,
            1,
            PERIOD_SECONDS,
            base32::decode(secret),
            Some("filegate".to_string()),
            "admin".to_string(),
        );
        totp.generate(time_step * PERIOD_SECONDS)
    }

    #[test]
    fn rfc6238_sha1_vectors() {
        // Eight digit vectors from the RFC truncated to six digits
        let vectors = [
            (59_i64, "287082"),
            (1_111_111_109, "081804"),
            (1_111_111_111, "050471"),
            (1_234_567_890, "005924"),
            (2_000_000_000, "279037"),
        ];
        for (time, expected) in vectors {
            let code = generate(RFC_SECRET, step_at(time)).unwrap();
            assert_eq!(format_code(code), expected, "time {time}");
        }
    }

    #[test]
    fn matches_independent_implementation_at_step_zero() {
        let ours = format_code(generate(DEMO_SECRET, 0).unwrap());
        assert_eq!(ours, reference(DEMO_SECRET, 0));
    }

    #[test]
    fn matches_independent_implementation_across_steps() {
        for step in [1_u64, 2, 1_000, 55_555_555, 66_666_666] {
            let ours = format_code(generate(DEMO_SECRET, step).unwrap());
            assert_eq!(ours, reference(DEMO_SECRET, step), "step {step}");
        }
    }

    #[test]
    fn generate_is_deterministic_and_bounded() {
        let first = generate(DEMO_SECRET, 1234).unwrap();
        let second = generate(DEMO_SECRET, 1234).unwrap();
        assert_eq!(first, second);
        assert!(first < MODULUS);
    }

    #[test]
    fn verify_exact_step_with_zero_window() {
        let code = format_code(generate(DEMO_SECRET, 5000).unwrap());
        assert!(verify_at(DEMO_SECRET, &code, 0, 5000));
    }

    #[test]
    fn verify_default_window_bounds() {
        let now = 10_000;
        for (step, accepted) in [
            (now - 2, false),
            (now - 1, true),
            (now, true),
            (now + 1, true),
            (now + 2, false),
        ] {
            let code = format_code(generate(DEMO_SECRET, step).unwrap());
            // Neighbouring steps can collide by chance; only assert the
            // rejection when the code differs from every accepted step.
            let collides = (now - 1..=now + 1)
                .any(|s| format_code(generate(DEMO_SECRET, s).unwrap()) == code);
            if accepted || !collides {
                assert_eq!(
                    verify_at(DEMO_SECRET, &code, DEFAULT_WINDOW, now),
                    accepted,
                    "step {step}"
                );
            }
        }
    }

    #[test]
    fn verify_rejects_malformed_codes() {
        for code in ["12345", "1234567", "12a456", "", "      ", "１２３４５６"] {
            assert!(!verify_at(DEMO_SECRET, code, DEFAULT_WINDOW, 10_000), "{code}");
        }
    }

    #[test]
    fn verify_trims_whitespace() {
        let code = format_code(generate(DEMO_SECRET, 42).unwrap());
        assert!(verify_at(DEMO_SECRET, &format!(" {code}\n"), 0, 42));
    }

    #[test]
    fn verify_at_step_zero_skips_negative_steps() {
        let code = format_code(generate(DEMO_SECRET, 0).unwrap());
        assert!(verify_at(DEMO_SECRET, &code, DEFAULT_WINDOW, 0));
    }

    #[test]
    fn step_at_handles_negative_time() {
        assert_eq!(step_at(-5), 0);
        assert_eq!(step_at(59), 1);
        assert_eq!(step_at(60), 2);
    }

    #[test]
    fn generated_secret_uses_base32_alphabet() {
        let secret = generate_secret();
        assert_eq!(secret.len(), SECRET_LENGTH);
        assert!(secret.bytes().all(|b| base32::ALPHABET.contains(&b)));
        assert_eq!(base32::decode(&secret).len(), 10);
    }

    #[test]
    fn otpauth_uri_grammar() {
        let uri = otpauth_uri("SecureUploadAdmin", "admin@yourdomain", DEMO_SECRET);
        assert_eq!(
            uri,
            "otpauth://totp/SecureUploadAdmin:admin%40yourdomain?secret=JBSWY3DPEHPK3PXP&issuer=SecureUploadAdmin"
        );
    }

    #[test]
    fn otpauth_uri_encodes_spaces_like_forms() {
        let uri = otpauth_uri("My Files", "me", "AAAA");
        assert_eq!(uri, "otpauth://totp/My+Files:me?secret=AAAA&issuer=My+Files");
    }
}
