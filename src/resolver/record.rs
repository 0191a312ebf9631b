use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::cnpj::Cnpj;
use crate::providers::CompanyData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Partial,
    Complete,
    Error,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Partial => "partial",
            RecordStatus::Complete => "complete",
            RecordStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CompanyName,
    City,
    State,
    LegalNature,
    RegistrationStatus,
    Size,
    Mei,
    Phone,
    Email,
}

/// Where a field value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSource {
    Provider { name: String },
    /// `position` is 1-based in the lookup site order.
    Site { position: usize, name: String },
}

impl FieldSource {
    pub fn provider(name: impl Into<String>) -> Self {
        FieldSource::Provider { name: name.into() }
    }

    pub fn site(position: usize, name: impl Into<String>) -> Self {
        FieldSource::Site {
            position,
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Provider { name } => f.write_str(name),
            FieldSource::Site { position, name } => write!(f, "site #{} ({})", position, name),
        }
    }
}

/// Enrichment state of one identifier.
///
/// Fields are only ever filled, never replaced; the setters live with the resolver.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRecord {
    cnpj: Cnpj,
    company_name: Option<String>,
    city: Option<String>,
    state: Option<String>,
    legal_nature: Option<String>,
    registration_status: Option<String>,
    size: Option<String>,
    mei: Option<bool>,
    phone: Option<String>,
    email: Option<String>,
    sources: BTreeMap<Field, FieldSource>,
    status: RecordStatus,
    attempts: u32,
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) -> bool {
    match (slot.as_ref(), value) {
        (None, Some(v)) => {
            *slot = Some(v.clone());
            true
        }
        _ => false,
    }
}

impl EnrichmentRecord {
    pub fn new(cnpj: Cnpj) -> Self {
        Self {
            cnpj,
            company_name: None,
            city: None,
            state: None,
            legal_nature: None,
            registration_status: None,
            size: None,
            mei: None,
            phone: None,
            email: None,
            sources: BTreeMap::new(),
            status: RecordStatus::Pending,
            attempts: 0,
        }
    }

    pub fn cnpj(&self) -> &Cnpj {
        &self.cnpj
    }

    pub fn company_name(&self) -> Option<&str> {
        self.company_name.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn legal_nature(&self) -> Option<&str> {
        self.legal_nature.as_deref()
    }

    pub fn registration_status(&self) -> Option<&str> {
        self.registration_status.as_deref()
    }

    pub fn size(&self) -> Option<&str> {
        self.size.as_deref()
    }

    pub fn mei(&self) -> Option<bool> {
        self.mei
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn source_of(&self, field: Field) -> Option<&FieldSource> {
        self.sources.get(&field)
    }

    pub fn sources(&self) -> &BTreeMap<Field, FieldSource> {
        &self.sources
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_basic_data(&self) -> bool {
        self.company_name.is_some()
            && (self.legal_nature.is_some()
                || self.registration_status.is_some()
                || self.size.is_some())
    }

    pub fn is_complete(&self) -> bool {
        self.company_name.is_some() && self.phone.is_some() && self.email.is_some()
    }

    pub fn has_any_data(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Whether another provider could still contribute something.
    pub fn needs_provider_data(&self) -> bool {
        !self.has_basic_data() || self.phone.is_none() || self.email.is_none()
    }

    /// Fills every empty field that `data` carries. Returns the fields filled.
    pub(super) fn merge_company(&mut self, data: &CompanyData, source: &FieldSource) -> Vec<Field> {
        let mut filled = Vec::new();

        let slots = [
            (Field::CompanyName, fill(&mut self.company_name, &data.name)),
            (Field::City, fill(&mut self.city, &data.city)),
            (Field::State, fill(&mut self.state, &data.state)),
            (Field::LegalNature, fill(&mut self.legal_nature, &data.legal_nature)),
            (
                Field::RegistrationStatus,
                fill(&mut self.registration_status, &data.registration_status),
            ),
            (Field::Size, fill(&mut self.size, &data.size)),
            (Field::Mei, fill(&mut self.mei, &data.mei)),
            (Field::Phone, fill(&mut self.phone, &data.phone)),
            (Field::Email, fill(&mut self.email, &data.email)),
        ];

        for (field, was_filled) in slots {
            if was_filled {
                self.sources.insert(field, source.clone());
                filled.push(field);
            }
        }

        filled
    }

    pub(super) fn fill_phone(&mut self, phone: &str, source: FieldSource) -> bool {
        if self.phone.is_some() {
            return false;
        }
        self.phone = Some(phone.to_string());
        self.sources.insert(Field::Phone, source);
        true
    }

    pub(super) fn fill_email(&mut self, email: &str, source: FieldSource) -> bool {
        if self.email.is_some() {
            return false;
        }
        self.email = Some(email.to_string());
        self.sources.insert(Field::Email, source);
        true
    }

    pub(super) fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(super) fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }
}
