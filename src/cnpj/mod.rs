use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid format: expected 14 digits, got {digits} in {raw:?}")]
    InvalidFormat { raw: String, digits: usize },
    #[error("invalid checksum for {0}")]
    InvalidChecksum(String),
}

/// A checksum-valid CNPJ, stored as its 14 raw digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cnpj(String);

impl Cnpj {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Punctuated form, e.g. `00.000.000/0001-91`.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Cnpj {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// Keeps only the digits of `raw` and checks both modulo-11 check digits.
///
/// Pure: never touches the network, so callers use it to drop bad input
/// before a single request goes out.
pub fn validate(raw: &str) -> Result<Cnpj, ValidationError> {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != 14 {
        return Err(ValidationError::InvalidFormat {
            raw: raw.trim().to_string(),
            digits: digits.len(),
        });
    }

    let normalized: String = digits
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect();

    let first = check_digit(&digits[..12], &FIRST_WEIGHTS);
    let second = check_digit(&digits[..13], &SECOND_WEIGHTS);

    if digits[12] != first || digits[13] != second {
        return Err(ValidationError::InvalidChecksum(normalized));
    }

    Ok(Cnpj(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_public_sector_identifier() {
        let cnpj = validate("00000000000191").unwrap();
        assert_eq!(cnpj.as_str(), "00000000000191");
        assert_eq!(cnpj.formatted(), "00.000.000/0001-91");
    }

    #[test]
    fn test_mutated_last_digit_fails() {
        for last in ['0', '2', '3', '4', '5', '6', '7', '8', '9'] {
            let raw = format!("0000000000019{}", last);
            assert_eq!(
                validate(&raw),
                Err(ValidationError::InvalidChecksum(raw.clone())),
                "{} should fail",
                raw
            );
        }
    }

    #[test]
    fn test_punctuation_is_stripped() {
        let cnpj = validate(" 11.222.333/0001-81 ").unwrap();
        assert_eq!(cnpj.as_str(), "11222333000181");
    }

    #[test]
    fn test_other_valid_identifiers() {
        for raw in ["07134405000161", "33000167000101", "11222333000181"] {
            assert!(validate(raw).is_ok(), "{} should validate", raw);
        }
    }

    #[test]
    fn test_wrong_length_is_format_error() {
        assert!(matches!(
            validate("1234567890123"),
            Err(ValidationError::InvalidFormat { digits: 13, .. })
        ));
        assert!(matches!(
            validate("123456789012345"),
            Err(ValidationError::InvalidFormat { digits: 15, .. })
        ));
        assert!(matches!(
            validate(""),
            Err(ValidationError::InvalidFormat { digits: 0, .. })
        ));
    }

    #[test]
    fn test_non_digit_characters_are_stripped() {
        let cnpj = validate("CNPJ 00000000000191").unwrap();
        assert_eq!(cnpj.as_str(), "00000000000191");
        assert!(matches!(
            validate("CNPJ 0000000000019"),
            Err(ValidationError::InvalidFormat { digits: 13, .. })
        ));
    }

    #[test]
    fn test_acceptance_follows_check_digits_only() {
        // All zeros has matching check digits; other repeated digits do not.
        assert!(validate("00000000000000").is_ok());
        assert!(matches!(
            validate("11111111111111"),
            Err(ValidationError::InvalidChecksum(_))
        ));
    }

    #[test]
    fn test_every_checksum_pair_is_unique() {
        // Exactly one of the 100 possible suffixes validates for a fixed base.
        let base = "112223330001";
        let valid = (0..100)
            .filter(|n| validate(&format!("{}{:02}", base, n)).is_ok())
            .count();
        assert_eq!(valid, 1);
    }
}
