use serde::{Deserialize, Serialize};

/// A device identifier paired with the person or place it is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub imei: String,
    pub name: String,
}

impl Record {
    pub fn new(imei: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            imei: imei.into(),
            name: name.into(),
        }
    }
}

/// A target sheet name. The empty string lets the webhook pick its default sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn default_sheet() -> Self {
        Self(String::new())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outcome of writing one record to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub imei: String,
    pub name: String,
    pub sheet_name: Destination,
    /// Webhook reply verbatim, or the transport error text when `delivered` is false.
    pub status: String,
    pub delivered: bool,
}

impl DispatchResult {
    pub fn delivered(record: &Record, destination: &Destination, status: String) -> Self {
        Self {
            imei: record.imei.clone(),
            name: record.name.clone(),
            sheet_name: destination.clone(),
            status,
            delivered: true,
        }
    }

    pub fn failed(record: &Record, destination: &Destination, error: String) -> Self {
        Self {
            imei: record.imei.clone(),
            name: record.name.clone(),
            sheet_name: destination.clone(),
            status: error,
            delivered: false,
        }
    }
}

/// A JSON string or number. Identifiers show up as either depending on the producer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    pub fn into_string(self) -> String {
        match self {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        }
    }
}
