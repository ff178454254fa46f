//! Messages exchanged with the remote side: detection reports going out,
//! upload grants coming back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, SmartguardError};

/// Per-frame counts sent with a detection report. No pixels leave the
/// device in this message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub num_faces_detected: u32,
    pub num_objects_detected: u32,
}

/// Detection event published to the remote consumer to request upload
/// permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub client_id: String,
    pub frames: Vec<FrameSummary>,
}

impl DetectionMessage {
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| SmartguardError::Network(format!("failed to encode report: {err}")))
    }
}

/// Why a report was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    /// The window held a frame above the good threshold. Refreshes the long
    /// cooldown.
    Good,
    /// Sustained motion without a good frame; the best available frame is
    /// sent anyway.
    BestEffort,
}

/// Raw message received from the remote side on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// One destination the device may transfer frame bytes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub name: String,
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

impl UploadTarget {
    /// File name for the multipart file part.
    pub fn file_name(&self) -> &str {
        self.fields
            .get("key")
            .map(String::as_str)
            .unwrap_or("frame.jpg")
    }
}

/// Upload permission issued by the remote side for the last report.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadGrant {
    pub targets: Vec<UploadTarget>,
    /// Everything in the payload that is not a target, passed through as-is.
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct UploadUrl {
    url: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl UploadGrant {
    /// Parses a grant payload.
    ///
    /// Every top-level object holding an `upload_url` is a named target.
    /// A payload with no target, or with a target that cannot be read, is
    /// rejected as a whole.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| grant_error(format!("invalid json: {err}")))?;
        let Value::Object(entries) = value else {
            return Err(grant_error("payload is not a json object"));
        };

        let mut targets = Vec::new();
        let mut metadata = Map::new();
        for (name, entry) in entries {
            match entry.get("upload_url") {
                Some(upload_url) => {
                    let upload_url: UploadUrl = serde_json::from_value(upload_url.clone())
                        .map_err(|err| grant_error(format!("target '{name}': {err}")))?;
                    if upload_url.url.is_empty() {
                        return Err(grant_error(format!("target '{name}' has an empty url")));
                    }
                    let fields = upload_url
                        .fields
                        .into_iter()
                        .map(|(key, value)| match value {
                            Value::String(text) => (key, text),
                            other => (key, other.to_string()),
                        })
                        .collect();
                    targets.push(UploadTarget {
                        name,
                        url: upload_url.url,
                        fields,
                    });
                }
                None => {
                    metadata.insert(name, entry);
                }
            }
        }

        if targets.is_empty() {
            return Err(grant_error("no upload targets"));
        }
        Ok(Self { targets, metadata })
    }
}

fn grant_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Grant(message.into())
}
