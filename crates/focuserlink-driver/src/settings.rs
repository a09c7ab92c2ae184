//! Settings reconciler: read the whole settings record, patch fields by
//! position, write the whole record back.
//!
//! The device has no partial-update command, so every field not edited is
//! round-tripped verbatim. A patch costs two exchanges and is all-or-nothing
//! from the caller's point of view: the caller updates its cached state only
//! when [`patch`] returns `Ok`.

use crate::link::LineLink;
use crate::protocol::{Command, Verb};
use crate::record::{render, SettingsField, SettingsRecord};
use focuserlink_core::error::LinkError;
use std::collections::BTreeMap;

/// Field edits keyed by record position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    edits: BTreeMap<usize, String>,
}

impl SettingsPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a named settings field.
    pub fn set(self, field: SettingsField, value: impl Into<String>) -> Self {
        self.set_index(field.index(), value)
    }

    /// Set a field by raw position.
    pub fn set_index(mut self, index: usize, value: impl Into<String>) -> Self {
        self.edits.insert(index, value.into());
        self
    }

    /// Whether there is nothing to change.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Minimum record length the edits need.
    pub fn required_len(&self) -> usize {
        self.edits.keys().next_back().map_or(0, |max| max + 1)
    }

    /// Turn a read record into the write record: retag field 0 with
    /// `write_verb`, then apply every edit. Nothing is touched when the
    /// record is too short.
    pub fn apply(
        &self,
        fields: &mut [String],
        read_verb: Verb,
        write_verb: Verb,
    ) -> Result<(), LinkError> {
        let required = self.required_len().max(1);
        if fields.len() < required {
            return Err(LinkError::ShortRecord {
                verb: read_verb.as_char(),
                required,
                actual: fields.len(),
            });
        }

        fields[0] = write_verb.as_char().to_string();
        for (&index, value) in &self.edits {
            fields[index] = value.clone();
        }
        Ok(())
    }
}

/// Read-modify-write one record.
///
/// Issues `read_verb`, patches the response, and sends it back as a
/// `write_verb` command whose response must echo `write_verb`.
pub async fn patch(
    link: &mut LineLink,
    read_verb: Verb,
    write_verb: Verb,
    edits: &SettingsPatch,
) -> Result<(), LinkError> {
    let read = Command::new(read_verb.as_char().to_string())?;
    let record = link.query(&read).await?;

    let mut fields = record.into_fields();
    edits.apply(&mut fields, read_verb, write_verb)?;

    let write = Command::new(render(&fields))?;
    link.query(&write).await?;

    tracing::info!(fields = edits.edits.len(), "Settings record updated");
    Ok(())
}

/// Query and decode the settings record.
pub async fn read_settings(link: &mut LineLink) -> Result<SettingsRecord, LinkError> {
    let record = link.query(&Command::read_settings()).await?;
    SettingsRecord::decode(&record)
}
