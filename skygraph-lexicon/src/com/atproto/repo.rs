use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}
