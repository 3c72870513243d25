//! Fixture builders for live contact/company rows.

use outreach_core::segment::CapturedAttributes;
use serde_json::{Map, Value};

/// One live contact row, joined to its company, as seen by the in-memory
/// member source.
///
/// Field maps hold whatever the filters under test want to select on;
/// captured attributes are derived from the well-known `name`, `email`,
/// `position` and company `summary` fields at capture time.
#[derive(Debug, Clone)]
pub struct LiveMember {
    /// Contact id.
    pub contact_id: String,
    /// Company id, when the contact has one.
    pub company_id: Option<String>,
    /// Contact-family fields (`contacts.` namespace).
    pub contact: Map<String, Value>,
    /// Company-family fields (`companies.` namespace).
    pub company: Map<String, Value>,
}

impl LiveMember {
    /// Start a builder for a contact with the given id.
    #[must_use]
    pub fn new(contact_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            company_id: None,
            contact: Map::new(),
            company: Map::new(),
        }
    }

    /// Attach a company id.
    #[must_use]
    pub fn with_company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    /// Set a contact-family field.
    #[must_use]
    pub fn contact_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.contact.insert(key.into(), value);
        self
    }

    /// Set a company-family field.
    #[must_use]
    pub fn company_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.company.insert(key.into(), value);
        self
    }

    /// Derive the attributes a snapshot would freeze for this row.
    #[must_use]
    pub fn captured(&self) -> CapturedAttributes {
        let text = |map: &Map<String, Value>, key: &str| {
            map.get(key).and_then(Value::as_str).map(str::to_string)
        };
        CapturedAttributes {
            name: text(&self.contact, "name"),
            email: text(&self.contact, "email"),
            position: text(&self.contact, "position"),
            company_summary: text(&self.company, "summary"),
        }
    }
}
