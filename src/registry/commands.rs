use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    error::{RegistryError, RegistryResult},
    models::{Alarm, AlarmDraft},
};

use super::AlarmRegistry;

/// One edit from the app shell, e.g. `{"op":"delete","alarmId":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum AlarmEdit {
    Create {
        draft: AlarmDraft,
    },
    Update {
        alarm: Alarm,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        alarm_id: String,
    },
}

impl AlarmEdit {
    pub fn from_json(raw: &str) -> RegistryResult<Self> {
        serde_json::from_str(raw).map_err(|e| RegistryError::MalformedEdit(e.to_string()))
    }

    /// Parses a JSON array of edits.
    pub fn batch_from_json(raw: &str) -> RegistryResult<Vec<Self>> {
        serde_json::from_str(raw).map_err(|e| RegistryError::MalformedEdit(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EditOutcome {
    Created { alarm: Alarm },
    Updated { alarm: Alarm },
    #[serde(rename_all = "camelCase")]
    Deleted { alarm_id: String },
}

pub async fn apply_edit(registry: &AlarmRegistry, edit: AlarmEdit) -> RegistryResult<EditOutcome> {
    match edit {
        AlarmEdit::Create { draft } => registry
            .create(draft)
            .await
            .map(|alarm| EditOutcome::Created { alarm }),
        AlarmEdit::Update { alarm } => registry
            .update(alarm)
            .await
            .map(|alarm| EditOutcome::Updated { alarm }),
        AlarmEdit::Delete { alarm_id } => {
            registry.delete(&alarm_id).await?;
            Ok(EditOutcome::Deleted { alarm_id })
        }
    }
}

/// Applies edits in order. A rejected edit does not stop the rest.
pub async fn apply_edits(
    registry: &AlarmRegistry,
    edits: Vec<AlarmEdit>,
) -> Vec<RegistryResult<EditOutcome>> {
    let mut outcomes = Vec::with_capacity(edits.len());
    for edit in edits {
        let outcome = apply_edit(registry, edit).await;
        if let Err(err) = &outcome {
            warn!("Rejected alarm edit: {err}");
        }
        outcomes.push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::ScheduleAnalyzer,
        db::{Database, Schema},
        optimizer::WakeTimeOptimizer,
        settings::SettingsStore,
    };

    async fn registry(dir: &tempfile::TempDir) -> AlarmRegistry {
        let db = Database::new(dir.path().join("registry.sqlite3"), Schema::Registry).unwrap();
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        AlarmRegistry::load(
            db,
            settings,
            ScheduleAnalyzer::default(),
            WakeTimeOptimizer::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn parses_edits_from_json() {
        let edit = AlarmEdit::from_json(r#"{"op":"delete","alarmId":"a1"}"#).unwrap();
        assert_eq!(
            edit,
            AlarmEdit::Delete {
                alarm_id: "a1".into()
            }
        );

        let edit = AlarmEdit::from_json(
            r#"{"op":"create","draft":{"label":"gym","time":"05:45","repeatDays":[0,2,4]}}"#,
        )
        .unwrap();
        let AlarmEdit::Create { draft } = edit else {
            panic!("expected create");
        };
        assert_eq!(draft.time.to_string(), "05:45");
        assert!(draft.enabled);
        assert_eq!(draft.repeat_days.len(), 3);
    }

    #[test]
    fn malformed_time_is_rejected() {
        let err = AlarmEdit::from_json(r#"{"op":"create","draft":{"label":"x","time":"25:00"}}"#)
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedEdit(msg) if msg.contains("25:00")));
        assert!(AlarmEdit::from_json(r#"{"op":"snooze"}"#).is_err());
    }

    #[tokio::test]
    async fn batch_keeps_going_after_rejection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(&dir).await;

        let edits = AlarmEdit::batch_from_json(
            r#"[
                {"op":"create","draft":{"label":"first","time":"06:00"}},
                {"op":"delete","alarmId":"missing"},
                {"op":"create","draft":{"label":"second","time":"07:00","repeatDays":[5,6]}}
            ]"#,
        )
        .unwrap();
        let outcomes = apply_edits(&registry, edits).await;

        assert!(matches!(outcomes[0], Ok(EditOutcome::Created { .. })));
        assert!(matches!(outcomes[1], Err(RegistryError::NotFound(_))));
        assert!(matches!(outcomes[2], Ok(EditOutcome::Created { .. })));
        assert_eq!(registry.enabled_count().await, 2);
    }

    #[tokio::test]
    async fn update_and_delete_through_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(&dir).await;
        let created = apply_edit(
            &registry,
            AlarmEdit::Create {
                draft: AlarmDraft::new("wake", "07:00".parse().unwrap()),
            },
        )
        .await
        .unwrap();
        let EditOutcome::Created { alarm } = created else {
            panic!("expected created");
        };

        let disabled = Alarm {
            enabled: false,
            ..alarm.clone()
        };
        let updated = apply_edit(&registry, AlarmEdit::Update { alarm: disabled })
            .await
            .unwrap();
        assert!(matches!(updated, EditOutcome::Updated { alarm } if !alarm.enabled));

        let deleted = apply_edit(
            &registry,
            AlarmEdit::Delete {
                alarm_id: alarm.id.clone(),
            },
        )
        .await
        .unwrap();
        assert_eq!(deleted, EditOutcome::Deleted { alarm_id: alarm.id });
        assert!(registry.list().await.is_empty());
    }
}
