use crate::model::attachment::AttachmentRef;
use crate::model::form_spec::{BlockKind, FieldBlock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stored content of one block in a version snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Attachments(Vec<AttachmentRef>),
}

/// Block name to stored value, ordered so snapshots serialize deterministically.
pub type FieldValues = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn attachments(&self) -> &[AttachmentRef] {
        match self {
            FieldValue::Attachments(refs) => refs,
            FieldValue::Text(_) | FieldValue::List(_) => &[],
        }
    }

    /// Whether this value has the shape `block` expects.
    pub fn fits(&self, block: &FieldBlock) -> bool {
        match (self, block.kind) {
            (FieldValue::Attachments(_), BlockKind::Image) => true,
            (FieldValue::List(_), BlockKind::Text | BlockKind::TableRow) => block.is_repeated(),
            (FieldValue::Text(_), BlockKind::Text | BlockKind::TableRow) => !block.is_repeated(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_tagged() {
        let v = FieldValue::List(vec!["a".to_string()]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"kind":"list","value":["a"]}"#);

        // an empty attachment list must not come back as an empty text list
        let empty = FieldValue::Attachments(Vec::new());
        let back: FieldValue =
            serde_json::from_str(&serde_json::to_string(&empty).unwrap()).unwrap();
        assert_eq!(back, empty);
    }
}
