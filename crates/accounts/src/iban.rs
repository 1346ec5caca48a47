//! International Bank Account Number value object.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use ledgerbank_core::{DomainError, ValueObject};

const MIN_LEN: usize = 15;
const MAX_LEN: usize = 34;

/// A structurally valid IBAN in electronic format (no spaces, upper case).
///
/// Normalisation happens at parse time, so two IBANs that differ only in case
/// or spacing compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl Iban {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() {
            return Err(DomainError::validation("iban is required"));
        }
        if !(MIN_LEN..=MAX_LEN).contains(&normalized.len()) {
            return Err(DomainError::validation(format!(
                "iban must be between {MIN_LEN} and {MAX_LEN} characters"
            )));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::validation("iban may only contain letters and digits"));
        }

        let bytes = normalized.as_bytes();
        if !bytes[..2].iter().all(u8::is_ascii_uppercase) || !bytes[2..4].iter().all(u8::is_ascii_digit)
        {
            return Err(DomainError::validation(
                "iban must start with a country code followed by two check digits",
            ));
        }
        if checksum(&normalized) != 1 {
            return Err(DomainError::validation("iban checksum is invalid"));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn country_code(&self) -> &str {
        &self.0[..2]
    }
}

/// ISO 13616 mod-97 over the rearranged IBAN.
fn checksum(iban: &str) -> u32 {
    let (head, tail) = iban.split_at(4);
    tail.chars().chain(head.chars()).fold(0u32, |rem, c| match c.to_digit(36) {
        Some(v) if v < 10 => (rem * 10 + v) % 97,
        Some(v) => (rem * 100 + v) % 97,
        None => rem,
    })
}

impl FromStr for Iban {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Iban {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Iban> for String {
    fn from(value: Iban) -> Self {
        value.0
    }
}

impl core::fmt::Display for Iban {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for Iban {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_good_ibans() {
        for raw in [
            "GB82WEST12345698765432",
            "DE89370400440532013000",
            "NL91ABNA0417164300",
            "FR1420041010050500013M02606",
            "TR400006200000000000000001",
        ] {
            assert!(Iban::parse(raw).is_ok(), "{raw} should be valid");
        }
    }

    #[test]
    fn normalises_spacing_and_case() {
        let iban = Iban::parse("gb82 west 1234 5698 7654 32").unwrap();
        assert_eq!(iban.as_str(), "GB82WEST12345698765432");
        assert_eq!(iban.country_code(), "GB");
        assert_eq!(iban, Iban::parse("GB82WEST12345698765432").unwrap());
    }

    #[test]
    fn rejects_blank_short_and_bad_checksum() {
        assert_eq!(
            Iban::parse("   ").unwrap_err(),
            DomainError::validation("iban is required")
        );
        assert!(Iban::parse("GB82WEST").is_err());
        assert_eq!(
            Iban::parse("GB82WEST12345698765431").unwrap_err(),
            DomainError::validation("iban checksum is invalid")
        );
        assert!(Iban::parse("1282WEST12345698765432").is_err());
        assert!(Iban::parse("GB82-WEST12345698765432").is_err());
    }

    #[test]
    fn serde_round_trips_as_plain_string() {
        let iban = Iban::parse("NL91ABNA0417164300").unwrap();
        let json = serde_json::to_string(&iban).unwrap();
        assert_eq!(json, "\"NL91ABNA0417164300\"");
        assert!(serde_json::from_str::<Iban>("\"NL00ABNA0417164300\"").is_err());
    }
}
