use serde::{Deserialize, Serialize};

/// One decoded Medium Auxiliary Memory attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MamAttribute {
    /// Attribute id
    pub id: u16,
    /// Attribute name
    pub name: String,
    /// Attribute value, formatted per the attribute's declared type
    pub value: String,
}
