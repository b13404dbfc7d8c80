use serde::Deserialize;

#[derive(Deserialize)]
/// Query string of the create endpoint: the key of the new form.
pub struct CreateFormRequest {
    pub name: String,
}

/// Which button of the edit page submitted the action form.
///
/// The edit page names its submit buttons after these values, so the action
/// is recognized by which of the names is present in the posted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormAction {
    SaveAndAssemble,
    FinalizeVersion,
    DeleteDraft,
    DraftFromThis,
}

impl FormAction {
    pub const ALL: [FormAction; 4] = [
        FormAction::SaveAndAssemble,
        FormAction::FinalizeVersion,
        FormAction::DeleteDraft,
        FormAction::DraftFromThis,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            FormAction::SaveAndAssemble => "save_and_assemble",
            FormAction::FinalizeVersion => "finalize_version",
            FormAction::DeleteDraft => "delete_draft",
            FormAction::DraftFromThis => "draft_from_this",
        }
    }

    /// First action whose button name is among the posted fields.
    pub fn detect(has_field: impl Fn(&str) -> bool) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| has_field(action.field_name()))
    }
}
