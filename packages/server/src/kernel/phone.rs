//! Ghana MSISDN normalization.
//!
//! Mobile-money methods are keyed by phone number. Everything is normalized
//! to the international `+233XXXXXXXXX` form before it goes anywhere near a
//! provider; malformed numbers fail fast with a validation error. The prefix
//! table also resolves which wallet network serves a number.

use lazy_static::lazy_static;
use momo::MomoNetwork;
use regex::Regex;

use crate::common::{CoreError, CoreResult};

lazy_static! {
    /// Accepts "+233XXXXXXXXX", "233XXXXXXXXX", "0XXXXXXXXX" or a bare
    /// 9-digit subscriber number, with optional separators already stripped.
    static ref MSISDN_RE: Regex = Regex::new(r"^(?:\+233|233|0)?([235][0-9]{8})$").unwrap();
}

/// Normalize a Ghanaian phone number to `+233XXXXXXXXX`.
pub fn normalize_msisdn(raw: &str) -> CoreResult<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();

    let captures = MSISDN_RE
        .captures(&compact)
        .ok_or_else(|| CoreError::validation(format!("invalid phone number: {raw}")))?;

    Ok(format!("+233{}", &captures[1]))
}

/// Which mobile-money network serves a normalized `+233…` number, by the
/// operator prefix (the two digits after the country code).
pub fn network_for(msisdn: &str) -> CoreResult<MomoNetwork> {
    let subscriber = msisdn
        .strip_prefix("+233")
        .ok_or_else(|| CoreError::validation(format!("not a normalized msisdn: {msisdn}")))?;

    match &subscriber[..2] {
        // MTN
        "24" | "25" | "53" | "54" | "55" | "59" => Ok(MomoNetwork::Mtn),
        // Telecel (Vodafone) Cash
        "20" | "50" => Ok(MomoNetwork::Telecel),
        // AT (AirtelTigo) Money
        "26" | "27" | "56" | "57" => Ok(MomoNetwork::AirtelTigo),
        prefix => Err(CoreError::validation(format!(
            "no mobile-money network for prefix 0{prefix}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_formats() {
        for raw in [
            "0244123456",
            "244123456",
            "233244123456",
            "+233244123456",
            "024 412 3456",
            "024-412-3456",
        ] {
            assert_eq!(normalize_msisdn(raw).unwrap(), "+233244123456", "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_numbers() {
        for raw in ["", "12345", "02441234", "02441234567", "+1555123456", "abc"] {
            assert!(normalize_msisdn(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn resolves_network_by_prefix() {
        assert_eq!(network_for("+233244123456").unwrap(), MomoNetwork::Mtn);
        assert_eq!(network_for("+233551234567").unwrap(), MomoNetwork::Mtn);
        assert_eq!(network_for("+233201234567").unwrap(), MomoNetwork::Telecel);
        assert_eq!(network_for("+233501234567").unwrap(), MomoNetwork::Telecel);
        assert_eq!(
            network_for("+233271234567").unwrap(),
            MomoNetwork::AirtelTigo
        );
        assert_eq!(
            network_for("+233571234567").unwrap(),
            MomoNetwork::AirtelTigo
        );
    }

    #[test]
    fn unknown_prefix_is_a_validation_error() {
        assert!(network_for("+233301234567").is_err());
        assert!(network_for("0244123456").is_err());
    }
}
