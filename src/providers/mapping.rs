use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::CompanyData;

fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reads a scalar at a JSON pointer as text.
fn text(payload: &Value, pointer: &str) -> Option<String> {
    match payload.pointer(pointer)? {
        Value::String(s) => clean(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(payload: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| text(payload, p))
}

fn flag(payload: &Value, pointer: &str) -> Option<bool> {
    match payload.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "sim" | "s" | "true" => Some(true),
            "não" | "nao" | "n" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn email(payload: &Value, pointers: &[&str]) -> Option<String> {
    first_text(payload, pointers)
        .map(|e| e.to_lowercase())
        .filter(|e| e.contains('@'))
}

/// Normalizes a registration date to `YYYY-MM-DD`.
///
/// ISO dates are kept, `DD/MM/YYYY` is converted and anything else is returned as given.
pub fn normalize_date(value: &str) -> String {
    let trimmed = value.trim();

    if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
        return trimmed.to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
        return date.format("%Y-%m-%d").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%d/%m/%Y %H:%M:%S") {
        return dt.date().format("%Y-%m-%d").to_string();
    }

    trimmed.to_string()
}

/// `"<status> desde <date>"`, or the bare status when no date is known.
pub fn format_status(status: Option<String>, date: Option<String>) -> Option<String> {
    let status = status?;
    match date {
        Some(date) => Some(format!("{} desde {}", status, normalize_date(&date))),
        None => Some(status),
    }
}

/// Joins phone numbers with `", "`, dropping blanks and repeats.
pub fn combine_phones<I>(phones: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: Vec<String> = Vec::new();
    for phone in phones {
        if let Some(phone) = clean(&phone) {
            if !seen.contains(&phone) {
                seen.push(phone);
            }
        }
    }

    if seen.is_empty() {
        None
    } else {
        Some(seen.join(", "))
    }
}

fn area_and_number(area: Option<String>, number: Option<String>) -> Option<String> {
    match (area, number) {
        (Some(area), Some(number)) => Some(format!("{}{}", area, number)),
        (None, Some(number)) => Some(number),
        _ => None,
    }
}

pub fn cnpja(payload: &Value) -> CompanyData {
    let phones = payload
        .pointer("/phones")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|p| area_and_number(text(p, "/area"), text(p, "/number")))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    CompanyData {
        name: text(payload, "/company/name"),
        city: text(payload, "/address/city"),
        state: text(payload, "/address/state"),
        legal_nature: text(payload, "/company/nature/text"),
        registration_status: format_status(
            text(payload, "/status/text"),
            first_text(payload, &["/statusDate", "/status/statusDate"]),
        ),
        size: text(payload, "/company/size/text"),
        mei: flag(payload, "/company/simei/optant"),
        phone: combine_phones(phones),
        email: email(payload, &["/emails/0/address"]),
    }
}

/// BrasilAPI and Minha Receita share the same payload shape.
pub fn brasil_api(payload: &Value) -> CompanyData {
    CompanyData {
        name: text(payload, "/razao_social"),
        city: text(payload, "/municipio"),
        state: text(payload, "/uf"),
        legal_nature: text(payload, "/natureza_juridica"),
        registration_status: format_status(
            text(payload, "/descricao_situacao_cadastral"),
            first_text(payload, &["/data_situacao_cadastral", "/data_inicio_atividade"]),
        ),
        size: text(payload, "/porte"),
        mei: flag(payload, "/opcao_pelo_mei"),
        phone: combine_phones(
            ["/ddd_telefone_1", "/ddd_telefone_2"]
                .iter()
                .filter_map(|p| text(payload, p)),
        ),
        email: email(payload, &["/email"]),
    }
}

pub fn receita_ws(payload: &Value) -> CompanyData {
    if text(payload, "/status").as_deref() == Some("ERROR") {
        return CompanyData::default();
    }

    let phones = text(payload, "/telefone")
        .map(|t| t.split('/').map(|p| p.trim().to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    CompanyData {
        name: text(payload, "/nome"),
        city: text(payload, "/municipio"),
        state: text(payload, "/uf"),
        legal_nature: text(payload, "/natureza_juridica"),
        registration_status: format_status(
            text(payload, "/situacao"),
            first_text(payload, &["/data_situacao", "/abertura"]),
        ),
        size: text(payload, "/porte"),
        mei: flag(payload, "/simei/optante"),
        phone: combine_phones(phones),
        email: email(payload, &["/email"]),
    }
}

pub fn cnpj_ws(payload: &Value) -> CompanyData {
    let phones = [("ddd1", "telefone1"), ("ddd2", "telefone2")]
        .iter()
        .filter_map(|(ddd, number)| {
            area_and_number(
                text(payload, &format!("/estabelecimento/{}", ddd)),
                text(payload, &format!("/estabelecimento/{}", number)),
            )
        })
        .collect::<Vec<_>>();

    CompanyData {
        name: text(payload, "/razao_social"),
        city: text(payload, "/estabelecimento/cidade/nome"),
        state: text(payload, "/estabelecimento/estado/sigla"),
        legal_nature: text(payload, "/natureza_juridica/descricao"),
        registration_status: format_status(
            text(payload, "/estabelecimento/situacao_cadastral"),
            first_text(
                payload,
                &[
                    "/estabelecimento/data_situacao_cadastral",
                    "/estabelecimento/data_inicio_atividade",
                ],
            ),
        ),
        size: text(payload, "/porte/descricao"),
        mei: flag(payload, "/simples/mei"),
        phone: combine_phones(phones),
        email: email(payload, &["/estabelecimento/email", "/email"]),
    }
}
