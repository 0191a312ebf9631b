use phonenumber::country::Id as CountryId;
use phonenumber::{Mode, PhoneNumber};
use tracing::debug;

/// Parses a Brazilian phone number, with or without the `+55` prefix.
///
/// Returns `None` unless libphonenumber considers it a valid BR number, which
/// rules out unassigned area codes and impossible subscriber prefixes.
pub fn parse_br(raw: &str) -> Option<PhoneNumber> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 11 && digits.starts_with("55") {
        digits.drain(..2);
    }
    if digits.len() != 10 && digits.len() != 11 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::BR), &digits) {
        Ok(number) if phonenumber::is_valid(&number) => Some(number),
        Ok(_) => {
            debug!("Not a valid BR phone: {}", raw);
            None
        }
        Err(e) => {
            debug!("Failed to parse BR phone {:?}: {:?}", raw, e);
            None
        }
    }
}

pub fn is_valid_br(raw: &str) -> bool {
    parse_br(raw).is_some()
}

/// National notation, e.g. `(11) 98765-4321`.
pub fn national(raw: &str) -> Option<String> {
    parse_br(raw).map(|number| number.format().mode(Mode::National).to_string())
}
