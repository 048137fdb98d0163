use serde::{Deserialize, Serialize};

/// Metadata tags on an atproto record, published by the author within the record
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SelfLabels {
    pub values: Vec<SelfLabel>,
}

/// Metadata tag on an atproto record, published by the author within the record.
/// Note that schemas should use #selfLabels, not #selfLabel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SelfLabel {
    /// The short string name of the value or type of this label.
    pub val: String,
}
