use serde::Deserialize;

use super::Scalar;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub base64pdf: Option<String>,
    pub imeis: Option<Vec<ManualEntry>>,
    /// Comma separated sheet names.
    pub sheet_name: Option<String>,
    pub overwrite: Option<bool>,
}

/// One element of a manually supplied identifier list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ManualEntry {
    Identifier(Scalar),
    Assigned {
        imei: Option<Scalar>,
        name: Option<Scalar>,
    },
}

impl ManualEntry {
    pub fn identifier(imei: impl Into<String>) -> Self {
        ManualEntry::Identifier(Scalar::Text(imei.into()))
    }

    pub fn assigned(imei: impl Into<String>, name: impl Into<String>) -> Self {
        ManualEntry::Assigned {
            imei: Some(Scalar::Text(imei.into())),
            name: Some(Scalar::Text(name.into())),
        }
    }
}
