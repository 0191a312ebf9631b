use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use uuid::Uuid;

use crate::phone;
use crate::resolver::{EnrichmentRecord, Field, RecordStatus};

const SLUG_STOPWORDS: &[&str] = &[
    "da", "do", "dos", "das", "de", "me", "epp", "lt", "ltda", "sa", "s", "ass", "com",
];

/// One line of the results file.
#[derive(Debug, Clone, Serialize)]
pub struct ResultLine {
    pub cnpj: String,
    pub company_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub legal_nature: Option<String>,
    pub registration_status: Option<String>,
    pub size: Option<String>,
    pub mei: Option<bool>,
    pub phone: Option<String>,
    pub phone_formatted: Option<String>,
    pub email: Option<String>,
    pub name_slug: Option<String>,
    pub sources: BTreeMap<Field, String>,
    pub status: RecordStatus,
    pub attempts: u32,
    pub run_id: Uuid,
    pub processed_at: DateTime<Utc>,
}

impl ResultLine {
    pub fn new(record: &EnrichmentRecord, run_id: Uuid) -> Self {
        let name_slug = record.company_name().map(|name| {
            build_name_slug(&[
                Some(name),
                record.city(),
                record.state(),
            ])
        });

        Self {
            cnpj: record.cnpj().to_string(),
            company_name: record.company_name().map(str::to_string),
            city: record.city().map(str::to_string),
            state: record.state().map(str::to_string),
            legal_nature: record.legal_nature().map(str::to_string),
            registration_status: record.registration_status().map(str::to_string),
            size: record.size().map(str::to_string),
            mei: record.mei(),
            phone: record.phone().map(str::to_string),
            phone_formatted: record.phone().and_then(format_br_phones),
            email: record.email().map(str::to_string),
            name_slug: name_slug.filter(|s| !s.is_empty()),
            sources: record
                .sources()
                .iter()
                .map(|(field, source)| (*field, source.to_string()))
                .collect(),
            status: record.status(),
            attempts: record.attempts(),
            run_id,
            processed_at: Utc::now(),
        }
    }
}

fn strip_accents(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// `"Padaria-Pao-Quente-Campinas-Sp"` style slug of name, city and state.
pub fn build_name_slug(parts: &[Option<&str>]) -> String {
    let joined = parts
        .iter()
        .flatten()
        .map(|p| strip_accents(&p.replace('.', "")))
        .collect::<Vec<_>>()
        .join(" ");

    joined
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .filter(|word| !SLUG_STOPWORDS.contains(&word.to_lowercase().as_str()))
        .map(capitalize)
        .collect::<Vec<_>>()
        .join("-")
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Formats a comma-separated phone list the Brazilian way, sorted and without repeats.
pub fn format_br_phones(raw: &str) -> Option<String> {
    let mut phones: Vec<String> = raw.split(',').filter_map(phone::national).collect();
    phones.sort();
    phones.dedup();

    if phones.is_empty() {
        None
    } else {
        Some(phones.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_name_slug() {
        assert_eq!(
            build_name_slug(&[Some("PADARIA PÃO QUENTE LTDA - ME"), Some("São Paulo"), Some("SP")]),
            "Padaria-Pao-Quente-Sao-Paulo-Sp"
        );
        assert_eq!(
            build_name_slug(&[Some("Comércio de Peças S.A."), None, Some("RJ")]),
            "Comercio-Pecas-Rj"
        );
        assert_eq!(build_name_slug(&[None, None]), "");
    }

    #[test]
    fn test_format_br_phones() {
        assert_eq!(
            format_br_phones("11987654321, 1133334444").as_deref(),
            Some("(11) 3333-4444, (11) 98765-4321")
        );
        assert_eq!(
            format_br_phones("+55 (21) 98888-7777").as_deref(),
            Some("(21) 98888-7777")
        );
        assert_eq!(
            format_br_phones("(11) 3333-4444, 1133334444").as_deref(),
            Some("(11) 3333-4444")
        );
        assert_eq!(format_br_phones("987654321"), None);
        assert_eq!(format_br_phones("123"), None);
        assert_eq!(
            format_br_phones("(29) 98765-4321, 4133332222").as_deref(),
            Some("(41) 3333-2222")
        );
    }
}
