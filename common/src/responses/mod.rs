use crate::model::display::DisplayModel;
use crate::model::form_instance::FormSummary;
use serde::Serialize;

/// Reply to `save_and_assemble`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    /// Key the form is stored under after a possible rename.
    pub formkey: String,
    pub version: u32,
    pub assembled: bool,
    /// Why assembly failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Reply to the actions that do not assemble a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub formkey: String,
    pub version: u32,
    pub message: String,
}

/// Everything the edit page needs to render one version of a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditView {
    pub formkey: String,
    pub formtype: String,
    pub version: u32,
    pub based_on_version: Option<u32>,
    pub is_draft: bool,
    pub has_document: bool,
    pub document_link: Option<String>,
    pub blocks: Vec<DisplayModel>,
}

/// Reply to the listing endpoint: the known form types and every stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormListing {
    pub formtypes: Vec<String>,
    pub forms: Vec<FormSummary>,
}
