use crate::assembler::template::{Record, Substitution, Substitutions};
use crate::error::FormError;
use common::model::attachment::AttachmentRef;
use common::model::field_value::{FieldValue, FieldValues};
use common::model::form_spec::FormSpec;
use std::path::Path;

/// Key of the single entry wrapping each value of a repeated block.
pub const VALUE_KEY: &str = "VALUE";
pub const PATH_KEY: &str = "PATH";
pub const FILENAME_KEY: &str = "FILENAME";
pub const HASH_KEY: &str = "HASH";

/// Builds the template substitutions of one version.
///
/// Blocks without a stored value (or with a value of the wrong shape) use the
/// block default. Every attachment is handed to `materialize`, which returns
/// the path of the copy placed next to the rendered document; records refer
/// to that copy by file name since the compiler runs in the same directory.
pub fn build_substitutions<F>(
    spec: &FormSpec,
    values: &FieldValues,
    mut materialize: F,
) -> Result<Substitutions, FormError>
where
    F: FnMut(&AttachmentRef) -> Result<std::path::PathBuf, FormError>,
{
    let mut subs = Substitutions::new();
    for block in &spec.blocks {
        let value = values
            .get(&block.name)
            .filter(|v| v.fits(block))
            .cloned()
            .unwrap_or_else(|| block.default_field_value());

        let substitution = match value {
            FieldValue::Text(s) => Substitution::Scalar(s),
            FieldValue::List(items) => Substitution::Records(
                items
                    .into_iter()
                    .map(|v| Record::from([(VALUE_KEY.to_string(), v)]))
                    .collect(),
            ),
            FieldValue::Attachments(refs) => {
                let mut records = Vec::with_capacity(refs.len());
                for r in &refs {
                    let local = materialize(r)?;
                    records.push(Record::from([
                        (PATH_KEY.to_string(), file_name(&local)),
                        (FILENAME_KEY.to_string(), r.display_name.clone()),
                        (HASH_KEY.to_string(), r.hash.clone()),
                    ]));
                }
                Substitution::Records(records)
            }
        };
        subs.insert(block.name.clone(), substitution);
    }
    Ok(subs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
