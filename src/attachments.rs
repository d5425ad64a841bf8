//! Copies files the student uploaded with essay answers next to the
//! exported PDF.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::blob::{BlobAddress, BlobStore, StoredBlob, ATTACHMENT_AREA, EXPORT_COMPONENT};
use crate::error::Result;
use crate::html::markup::clean_filename;
use crate::source::{AttemptStep, SlotRecord, StepState, SubjectRecord};

/// Question types whose responses may carry uploaded files.
const ATTACHMENT_QTYPES: [&str; 1] = ["essay"];

const RESPONSE_COMPONENT: &str = "question";
const RESPONSE_AREA: &str = "response_attachments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAttachment {
    pub slot: u32,
    pub filename: String,
    pub content_hash: String,
    /// False when an artifact of the same name existed already.
    pub stored: bool,
}

pub struct AttachmentExporter {
    blobs: Arc<dyn BlobStore>,
    /// Filesystem mirror, `{export dir}/{course id}`.
    mirror_dir: Option<PathBuf>,
}

/// The step the submitted files belong to: the last one holding an answer.
fn response_step(slot: &SlotRecord) -> Option<&AttemptStep> {
    slot.steps
        .iter()
        .rev()
        .find(|step| matches!(step.state, StepState::Complete | StepState::Invalid))
}

/// `{quiz}_{idnumber}_{attempt}_Question{slot}_Attachment_{base}_{hash}.{ext}`
pub fn attachment_filename(subject: &SubjectRecord, slot: u32, original: &str, hash: &str) -> String {
    let (base, extension) = match original.rsplit_once('.') {
        Some((base, extension)) if !base.is_empty() => (base, Some(extension)),
        _ => (original, None),
    };
    let mut name = format!(
        "{}_{}_{}_Question{}_Attachment_{}_{}",
        subject.quiz.name, subject.user.idnumber, subject.attempt.id, slot, base, hash
    );
    if let Some(extension) = extension {
        name.push('.');
        name.push_str(extension);
    }
    clean_filename(&name)
}

impl AttachmentExporter {
    pub fn new(blobs: Arc<dyn BlobStore>, mirror_dir: Option<PathBuf>) -> Self {
        Self { blobs, mirror_dir }
    }

    /// Persists every uploaded file of the subject's attachment-bearing
    /// questions. Files already exported under the same name are skipped.
    pub async fn export(&self, subject: &SubjectRecord) -> Result<Vec<ExportedAttachment>> {
        let mut exported = Vec::new();
        for slot in &subject.slots {
            if !ATTACHMENT_QTYPES.contains(&slot.qtype.as_str()) {
                continue;
            }
            let Some(step) = response_step(slot) else {
                continue;
            };
            let files = self
                .blobs
                .list_area(subject.quiz.context_id, RESPONSE_COMPONENT, RESPONSE_AREA, step.id)
                .await?;
            for file in files.iter().filter(|file| !file.is_empty()) {
                exported.push(self.export_file(subject, slot.slot, file).await?);
            }
        }
        if !exported.is_empty() {
            info!(
                attempt_id = subject.attempt.id,
                count = exported.len(),
                "Exported attempt attachments"
            );
        }
        Ok(exported)
    }

    async fn export_file(
        &self,
        subject: &SubjectRecord,
        slot: u32,
        file: &StoredBlob,
    ) -> Result<ExportedAttachment> {
        let filename =
            attachment_filename(subject, slot, &file.address.filename, &file.content_hash);
        let address = BlobAddress::new(
            subject.quiz.context_id,
            EXPORT_COMPONENT,
            ATTACHMENT_AREA,
            subject.attempt.id,
            filename.clone(),
        );

        let stored = if self.blobs.exists(&address).await? {
            debug!(filename = %filename, "Attachment already exported");
            false
        } else {
            self.blobs.put(&address, &file.bytes).await?;
            true
        };
        if let Some(dir) = &self.mirror_dir {
            write_if_missing(&dir.join(&filename), &file.bytes).await?;
        }

        Ok(ExportedAttachment {
            slot,
            filename,
            content_hash: file.content_hash.clone(),
            stored,
        })
    }
}

/// Writes `bytes` to `path` unless a file is already there.
pub(crate) async fn write_if_missing(path: &Path, bytes: &[u8]) -> Result<bool> {
    if tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    tokio::fs::write(path, bytes).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{content_hash, FsBlobStore};
    use crate::html::plugins::choice::tests::step;
    use crate::source::{fixtures, QuestionDefinition};
    use tempfile::TempDir;

    fn essay_slot(slot: u32, steps: Vec<AttemptStep>) -> SlotRecord {
        SlotRecord {
            slot,
            qtype: "essay".to_string(),
            steps,
            question: QuestionDefinition::Other,
        }
    }

    #[test]
    fn test_attachment_filename() {
        let subject = fixtures::subject(4);
        assert_eq!(
            attachment_filename(&subject, 2, "notes.final.pdf", "abc"),
            "Final Exam_M10_4_Question2_Attachment_notes.final_abc.pdf"
        );
        assert_eq!(
            attachment_filename(&subject, 2, "README", "abc"),
            "Final Exam_M10_4_Question2_Attachment_README_abc"
        );
    }

    #[test]
    fn test_response_step_is_last_answer() {
        let slot = essay_slot(
            1,
            vec![
                step(1, StepState::Todo, &[]),
                step(2, StepState::Complete, &[]),
                step(3, StepState::Invalid, &[]),
                step(4, StepState::MangrRight, &[]),
            ],
        );
        assert_eq!(response_step(&slot).map(|step| step.id), Some(3));
        assert!(response_step(&essay_slot(1, vec![step(1, StepState::Todo, &[])])).is_none());
    }

    #[tokio::test]
    async fn test_export_is_idempotent_per_content() {
        let dir = TempDir::new().unwrap();
        let mirror = dir.path().join("mirror");
        std::fs::create_dir_all(&mirror).unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path().join("files")));

        let mut subject = fixtures::subject(4);
        subject.slots.push(essay_slot(
            1,
            vec![step(1, StepState::Todo, &[]), step(7, StepState::Complete, &[])],
        ));
        subject.slots.push(SlotRecord {
            slot: 2,
            qtype: "multichoice".to_string(),
            steps: vec![step(8, StepState::Complete, &[])],
            question: QuestionDefinition::Other,
        });
        store
            .put(&BlobAddress::new(40, "question", "response_attachments", 7, "essay.docx"), b"v1")
            .await
            .unwrap();
        store
            .put(&BlobAddress::new(40, "question", "response_attachments", 8, "other.txt"), b"x")
            .await
            .unwrap();

        let exporter = AttachmentExporter::new(store.clone(), Some(mirror.clone()));
        let first = exporter.export(&subject).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].stored);
        assert_eq!(first[0].content_hash, content_hash(b"v1"));
        assert!(mirror.join(&first[0].filename).is_file());

        let second = exporter.export(&subject).await.unwrap();
        assert_eq!(second[0].filename, first[0].filename);
        assert!(!second[0].stored);

        // A resubmission with new content gets a new name.
        store
            .put(&BlobAddress::new(40, "question", "response_attachments", 7, "essay.docx"), b"v2")
            .await
            .unwrap();
        let third = exporter.export(&subject).await.unwrap();
        assert!(third[0].stored);
        assert_ne!(third[0].filename, first[0].filename);
        assert_eq!(
            store
                .list_area(40, EXPORT_COMPONENT, ATTACHMENT_AREA, 4)
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
