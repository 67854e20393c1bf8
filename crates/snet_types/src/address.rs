//! Address descriptors and evaluation results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::Quality;
use crate::types::DataType;
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Address Details
// ─────────────────────────────────────────────────────────────────────────────

/// Transform declared on an address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseParams {
    /// Call `method` on the named transform handle
    Method {
        /// Handle identifier, e.g. `"scale"` or `"scale:0.1"`
        handle: String,
        /// Method to invoke on the handle
        method: String,
    },
    /// Call `function` inside a JavaScript source
    Script {
        /// Script file path, or inline source when it contains a `function` keyword
        script: String,
        /// Global function to invoke
        function: String,
    },
}

/// Where and how an address value is republished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishParams {
    /// Topic handed to the message-queue backends
    pub topic: String,

    /// Optional content template; `{0}` is replaced with the value text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_format: Option<String>,

    /// Instance keys to deliver to; empty = every open instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl PublishParams {
    /// Publish on a topic to every open instance
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            content_format: None,
            targets: Vec::new(),
        }
    }

    /// Set the content template
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.content_format = Some(format.into());
        self
    }

    /// Restrict delivery to the given instance keys
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Render the payload text for a value
    pub fn format_content(&self, value: &Value) -> String {
        let text = value.to_string();
        match &self.content_format {
            Some(template) if !template.is_empty() => template.replace("{0}", &text),
            _ => text,
        }
    }
}

/// Immutable descriptor of an address, as read by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressDetails {
    /// Address name; virtual addresses embed their `{...}` directive here
    pub name: String,

    /// Declared data type
    #[serde(default)]
    pub data_type: DataType,

    /// Whether the value is synthesized instead of read from a device
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,

    /// Optional transform applied after conversion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseParams>,

    /// Optional republication to message-queue backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishParams>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AddressDetails {
    /// Create a plain address with a declared type
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_virtual: false,
            parse: None,
            publish: None,
            description: None,
        }
    }

    /// Create a virtual address
    pub fn virtual_address(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_virtual: true,
            ..Self::new(name, data_type)
        }
    }

    /// Attach a transform
    pub fn with_parse(mut self, parse: ParseParams) -> Self {
        self.parse = Some(parse);
        self
    }

    /// Attach publish parameters
    pub fn with_publish(mut self, publish: PublishParams) -> Self {
        self.publish = Some(publish);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address Value
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one evaluation of an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressValue {
    /// Address name
    pub address: String,
    /// Post-conversion, post-transform value
    pub result: Value,
    /// Post-conversion, pre-transform value
    pub original: Value,
    /// Quality of `result`
    pub quality: Quality,
    /// Human-readable diagnostic
    pub message: String,
    /// When the evaluation happened
    pub timestamp: DateTime<Utc>,
}

impl AddressValue {
    /// Create a result stamped with the current time
    pub fn new(
        address: impl Into<String>,
        result: Value,
        original: Value,
        quality: Quality,
        message: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            result,
            original,
            quality,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the value may be published
    pub fn is_good(&self) -> bool {
        self.quality.is_good()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
