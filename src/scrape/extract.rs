use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Node, Selector};

use crate::phone;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

const ASSET_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".css", ".js",
];

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "exemplo.com",
    "exemplo.com.br",
    "email.com",
    "dominio.com",
    "dominio.com.br",
    "seudominio.com.br",
    "sentry.io",
    "wixpress.com",
];

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\(?\d{2}\)?[\s.-]?\d{4,5}[\s.-]?\d{4}").expect("phone pattern is valid")
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

fn contact_link_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| {
        Selector::parse(r#"a[href^="tel:"], a[href^="mailto:"]"#).expect("selector is valid")
    })
}

/// Visible text of a rendered page followed by the targets of `tel:` and `mailto:` links.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut chunks: Vec<String> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .map(|name| SKIPPED_ELEMENTS.contains(&name.as_str()))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
    }

    for link in document.select(contact_link_selector()) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if let Some(number) = href.strip_prefix("tel:") {
            let mut number = digits(number);
            if number.len() > 11 && number.starts_with("55") {
                number = number[2..].to_string();
            }
            chunks.push(number);
        } else if let Some(address) = href.strip_prefix("mailto:") {
            let address = address.split('?').next().unwrap_or_default();
            let address = urlencoding::decode(address)
                .map(|a| a.into_owned())
                .unwrap_or_else(|_| address.to_string());
            chunks.push(address);
        }
    }

    chunks.join("\n")
}

fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// True when the match continues a longer number, such as a CNPJ, CEP or a formatted code.
fn embedded_in_number(text: &str, start: usize, end: usize) -> bool {
    let before: Vec<char> = text[..start].chars().rev().take(2).collect();
    let after: Vec<char> = text[end..].chars().take(2).collect();

    let touches = |near: &[char]| match near {
        [c, ..] if c.is_ascii_digit() => true,
        [sep, d, ..] if matches!(sep, '.' | '/' | '-') && d.is_ascii_digit() => true,
        _ => false,
    };

    touches(&before) || touches(&after)
}

/// First Brazilian phone number in `text` that is not part of `cnpj`.
pub fn extract_phone(text: &str, cnpj: &str) -> Option<String> {
    let cnpj_digits = digits(cnpj);

    phone_pattern().find_iter(text).find_map(|m| {
        if embedded_in_number(text, m.start(), m.end()) {
            return None;
        }
        let number = digits(m.as_str());
        if cnpj_digits.contains(&number) || !phone::is_valid_br(&number) {
            return None;
        }
        Some(m.as_str().trim().to_string())
    })
}

/// First plausible email in `text`, lowercased.
///
/// Addresses at `own_domain` (the lookup site itself) are skipped.
pub fn extract_email(text: &str, own_domain: Option<&str>) -> Option<String> {
    let own_domain = own_domain.map(|d| d.trim_start_matches("www.").to_lowercase());

    email_pattern().find_iter(text).find_map(|m| {
        let email = m.as_str().trim_matches('.').to_lowercase();
        let (_, domain) = email.rsplit_once('@')?;

        if !domain.contains('.') || domain.starts_with('.') || domain.contains("..") {
            return None;
        }
        if ASSET_SUFFIXES.iter().any(|suffix| email.ends_with(suffix)) {
            return None;
        }
        if PLACEHOLDER_DOMAINS.contains(&domain) {
            return None;
        }
        if let Some(own) = &own_domain {
            if domain == own || domain.ends_with(&format!(".{}", own)) {
                return None;
            }
        }
        Some(email)
    })
}
