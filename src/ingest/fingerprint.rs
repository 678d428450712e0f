use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fingerprint of a visitor: HMAC-SHA256 over `client_id || IP || UA`, keyed by the daily salt.
///
/// The value is stable for one visitor on one day and changes when the salt
/// rotates. Neither input can be recovered from it.
pub fn fingerprint(client_id: i64, ip: &str, user_agent: &str, daily_salt: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(daily_salt.as_bytes()).expect("HMAC accepts any key length");
    mac.update(&client_id.to_be_bytes());
    mac.update(ip.as_bytes());
    mac.update(b"|");
    mac.update(user_agent.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Salt for one UTC day, derived from the configured secret.
pub fn daily_salt(secret: &str, date: NaiveDate) -> String {
    let input = format!("{secret}:{date}");
    let mut mac =
        HmacSha256::new_from_slice(b"quietstats-salt").expect("HMAC accepts any key length");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = fingerprint(1, "192.168.1.1", "Mozilla/5.0", "salt");
        let b = fingerprint(1, "192.168.1.1", "Mozilla/5.0", "salt");
        assert_eq!(a, b);
    }

    #[test]
    fn test_inputs_change_fingerprint() {
        let base = fingerprint(1, "192.168.1.1", "Mozilla/5.0", "salt");
        assert_ne!(base, fingerprint(2, "192.168.1.1", "Mozilla/5.0", "salt"));
        assert_ne!(base, fingerprint(1, "192.168.1.2", "Mozilla/5.0", "salt"));
        assert_ne!(base, fingerprint(1, "192.168.1.1", "Chrome/120.0", "salt"));
        assert_ne!(base, fingerprint(1, "192.168.1.1", "Mozilla/5.0", "other"));
    }

    #[test]
    fn test_hex_encoded() {
        let id = fingerprint(0, "", "", "");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_daily_salt_rotates() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert_eq!(daily_salt("secret", d1), daily_salt("secret", d1));
        assert_ne!(daily_salt("secret", d1), daily_salt("secret", d2));
        assert_ne!(daily_salt("secret", d1), daily_salt("secret2", d1));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    proptest! {
        /// Distinct addresses never share a fingerprint.
        #[test]
        fn prop_unique_per_ip(
            suffix_a in 0u8..128u8,
            suffix_b in 128u8..=255u8,
            ua in "[A-Za-z0-9]{1,20}",
            salt in "[A-Za-z0-9]{1,20}",
        ) {
            let a = fingerprint(1, &format!("10.0.0.{suffix_a}"), &ua, &salt);
            let b = fingerprint(1, &format!("10.0.0.{suffix_b}"), &ua, &salt);
            prop_assert_ne!(a, b);
        }

        #[test]
        fn prop_salt_changes_per_day(
            secret in "[A-Za-z0-9]{1,20}",
            day_a in 0u32..180u32,
            day_b in 180u32..360u32,
        ) {
            let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let a = daily_salt(&secret, base + Duration::days(i64::from(day_a)));
            let b = daily_salt(&secret, base + Duration::days(i64::from(day_b)));
            prop_assert_ne!(a, b);
        }
    }
}
