//! Data request documents.
//!
//! A [`DataRequest`] is built once per run and is immutable after submission.
//! Placeholder fields (mnemonics starting with [`TAG_PREFIX`]) are kept in the
//! field list so the output schema can reserve them, but never go on the wire.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Marks a field as "reserve the column, don't request it".
pub const TAG_PREFIX: &str = "@@";

/// Opaque per-run token: request name and response-listing prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// `prefix` followed by 8 random lowercase hex characters.
    pub fn generate(prefix: &str) -> Self {
        let suffix: u32 = rand::thread_rng().gen();
        Self(format!("{prefix}{suffix:08x}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub identifier_type: String,
    pub identifier_value: String,
}

impl Identifier {
    pub fn new(identifier_type: impl Into<String>, identifier_value: impl Into<String>) -> Self {
        Self {
            identifier_type: identifier_type.into(),
            identifier_value: identifier_value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub mnemonic: String,
}

impl FieldSpec {
    pub fn new(mnemonic: impl Into<String>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.mnemonic.starts_with(TAG_PREFIX)
    }

    /// Output column name: the mnemonic with any tag prefix removed.
    pub fn column_name(&self) -> &str {
        self.mnemonic
            .strip_prefix(TAG_PREFIX)
            .unwrap_or(&self.mnemonic)
    }
}

/// Request trigger: run immediately, or hand to the provider's scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    ExecuteNow,
    Submit,
}

impl Trigger {
    /// Wire representation. `ExecuteNow` is a catalog-scoped trigger URL.
    pub fn to_document(self, catalog_url: &str) -> Value {
        match self {
            Trigger::ExecuteNow => Value::String(format!("{catalog_url}triggers/executeNow")),
            Trigger::Submit => json!({ "@type": "SubmitTrigger" }),
        }
    }
}

/// Licensing block identifying the consuming terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalIdentity {
    pub user_number: u64,
    pub serial_number: u64,
    pub workstation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub session_id: SessionId,
    pub universe: Vec<Identifier>,
    pub field_list: Vec<FieldSpec>,
    pub trigger: Trigger,
    pub terminal_identity: Option<TerminalIdentity>,
    pub description: String,
}

impl DataRequest {
    pub fn new(
        session_id: SessionId,
        identifier_type: &str,
        instruments: &[String],
        fields: &[String],
    ) -> Self {
        Self {
            session_id,
            universe: instruments
                .iter()
                .map(|value| Identifier::new(identifier_type, value.as_str()))
                .collect(),
            field_list: fields.iter().map(|f| FieldSpec::new(f.as_str())).collect(),
            trigger: Trigger::default(),
            terminal_identity: None,
            description: "DLCLIENT".to_string(),
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_terminal_identity(mut self, identity: Option<TerminalIdentity>) -> Self {
        self.terminal_identity = identity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Fields actually sent to the provider.
    pub fn outbound_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.field_list.iter().filter(|f| !f.is_placeholder())
    }

    /// Render the JSON document POSTed to the catalog's `requests/` endpoint.
    pub fn to_document(&self, catalog_url: &str) -> Value {
        let universe: Vec<Value> = self
            .universe
            .iter()
            .map(|id| {
                json!({
                    "@type": "Identifier",
                    "identifierType": id.identifier_type,
                    "identifierValue": id.identifier_value,
                })
            })
            .collect();
        let fields: Vec<Value> = self
            .outbound_fields()
            .map(|f| json!({ "mnemonic": f.mnemonic }))
            .collect();

        let mut doc = json!({
            "@type": "DataRequest",
            "name": self.session_id.as_str(),
            "description": self.description,
            "universe": { "@type": "Universe", "contains": universe },
            "fieldList": { "@type": "DataFieldList", "contains": fields },
            "trigger": self.trigger.to_document(catalog_url),
            "formatting": {
                "@type": "MediaType",
                "outputMediaType": "application/json",
            },
        });

        if let Some(ti) = self.terminal_identity {
            doc["terminalIdentity"] = json!({
                "@type": "BlpTerminalIdentity",
                "userNumber": ti.user_number,
                "serialNumber": ti.serial_number,
                "workStation": ti.workstation,
            });
        }
        doc
    }
}
