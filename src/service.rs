//! Entry points the host application calls: the submission trigger, manual
//! re-exports, the export overview, artifact download and zip packaging.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::sync::Arc;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::blob::{BlobAddress, BlobStore, StoredBlob, ATTACHMENT_AREA, EXPORT_AREA, EXPORT_COMPONENT};
use crate::error::{ExportError, Result};
use crate::export::{ExportOutcome, SubjectExporter};
use crate::html::markup::clean_filename;
use crate::job::ExportJob;
use crate::queue::ExportJobQueue;
use crate::source::{AttemptRecord, AttemptSource, QuizRecord};

const GRADE_CAPABILITY: &str = "mod/quiz:grade";
const VIEW_REPORTS_CAPABILITY: &str = "mod/quiz:viewreports";

/// Capabilities of the caller within the quiz, as decided by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewer {
    pub can_view_reports: bool,
    pub can_grade: bool,
}

impl Viewer {
    fn require_grade(&self) -> Result<()> {
        if self.can_grade {
            Ok(())
        } else {
            Err(ExportError::PermissionDenied(GRADE_CAPABILITY))
        }
    }

    fn require_view_reports(&self) -> Result<()> {
        if self.can_view_reports {
            Ok(())
        } else {
            Err(ExportError::PermissionDenied(VIEW_REPORTS_CAPABILITY))
        }
    }

    fn require_any(&self) -> Result<()> {
        if self.can_view_reports || self.can_grade {
            Ok(())
        } else {
            Err(ExportError::PermissionDenied(VIEW_REPORTS_CAPABILITY))
        }
    }
}

/// Progress of a bulk re-export, reported once per attempt.
#[derive(Debug)]
pub struct ProgressEvent<'a> {
    /// 1-based position of the attempt.
    pub current: usize,
    pub total: usize,
    pub attempt_id: i64,
    pub result: std::result::Result<&'a ExportOutcome, &'a ExportError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReexportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub filename: String,
    pub content_hash: String,
    pub bytes_len: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredBlob> for ArtifactSummary {
    fn from(blob: &StoredBlob) -> Self {
        Self {
            filename: blob.address.filename.clone(),
            content_hash: blob.content_hash.clone(),
            bytes_len: blob.len(),
            created_at: blob.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptExports {
    pub attempt_id: i64,
    pub artifacts: Vec<ArtifactSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserExports {
    pub user_id: i64,
    pub user_name: String,
    pub attempts: Vec<AttemptExports>,
}

pub struct ExportService {
    source: Arc<dyn AttemptSource>,
    blobs: Arc<dyn BlobStore>,
    queue: ExportJobQueue,
    exporter: Arc<dyn SubjectExporter>,
    autoexport: bool,
}

fn counts_for_archive(attempt: &AttemptRecord) -> bool {
    attempt.is_finished() && !attempt.preview
}

impl ExportService {
    pub fn new(
        source: Arc<dyn AttemptSource>,
        blobs: Arc<dyn BlobStore>,
        queue: ExportJobQueue,
        exporter: Arc<dyn SubjectExporter>,
        autoexport: bool,
    ) -> Self {
        Self {
            source,
            blobs,
            queue,
            exporter,
            autoexport,
        }
    }

    /// Attempt-submitted trigger. Queues an export when automatic export is on.
    pub async fn submit(&self, attempt_id: i64) -> Result<Option<ExportJob>> {
        if !self.autoexport {
            return Ok(None);
        }
        Ok(Some(self.queue.enqueue(attempt_id).await?))
    }

    /// Exports one attempt right away, bypassing the queue.
    pub async fn reexport(&self, viewer: Viewer, attempt_id: i64) -> Result<ExportOutcome> {
        viewer.require_grade()?;
        self.exporter.export(attempt_id).await
    }

    /// Re-exports every finished attempt of a quiz. A failing attempt is
    /// reported through `progress` and does not stop the others.
    pub async fn reexport_all<F>(
        &self,
        viewer: Viewer,
        quiz_id: i64,
        mut progress: F,
    ) -> Result<ReexportSummary>
    where
        F: FnMut(ProgressEvent<'_>) + Send,
    {
        viewer.require_grade()?;
        let attempts: Vec<i64> = self
            .source
            .attempts(quiz_id)
            .await?
            .into_iter()
            .filter(AttemptRecord::is_finished)
            .map(|attempt| attempt.id)
            .collect();

        let mut summary = ReexportSummary {
            total: attempts.len(),
            ..ReexportSummary::default()
        };
        for (index, attempt_id) in attempts.into_iter().enumerate() {
            let result = self.exporter.export(attempt_id).await;
            match &result {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    warn!(attempt_id, error = %err, "Re-export failed");
                    summary.failed += 1;
                }
            }
            progress(ProgressEvent {
                current: index + 1,
                total: summary.total,
                attempt_id,
                result: result.as_ref(),
            });
        }
        info!(
            quiz_id,
            total = summary.total,
            failed = summary.failed,
            "Re-exported quiz attempts"
        );
        Ok(summary)
    }

    async fn load_quiz(&self, quiz_id: i64) -> Result<QuizRecord> {
        self.source.quiz(quiz_id).await?.ok_or(ExportError::NotFound)
    }

    async fn export_artifacts(&self, quiz: &QuizRecord, attempt_id: i64) -> Result<Vec<StoredBlob>> {
        self.blobs
            .list_area(quiz.context_id, EXPORT_COMPONENT, EXPORT_AREA, attempt_id)
            .await
    }

    /// Per user with at least one real attempt, the export artifacts of each
    /// of their finished attempts, previews included.
    pub async fn overview(&self, viewer: Viewer, quiz_id: i64) -> Result<Vec<UserExports>> {
        viewer.require_any()?;
        let quiz = self.load_quiz(quiz_id).await?;

        let attempts = self.source.attempts(quiz_id).await?;
        let mut by_user: BTreeMap<i64, Vec<AttemptRecord>> = attempts
            .iter()
            .filter(|attempt| !attempt.preview)
            .map(|attempt| (attempt.user_id, Vec::new()))
            .collect();
        for attempt in attempts {
            if !attempt.is_finished() {
                continue;
            }
            if let Some(listed) = by_user.get_mut(&attempt.user_id) {
                listed.push(attempt);
            }
        }

        let mut overview = Vec::with_capacity(by_user.len());
        for (user_id, attempts) in by_user {
            let mut exports = Vec::with_capacity(attempts.len());
            for attempt in attempts {
                let artifacts = self.export_artifacts(&quiz, attempt.id).await?;
                exports.push(AttemptExports {
                    attempt_id: attempt.id,
                    artifacts: artifacts.iter().map(ArtifactSummary::from).collect(),
                });
            }
            overview.push(UserExports {
                user_id,
                user_name: self.source.user_display_name(user_id).await?,
                attempts: exports,
            });
        }
        Ok(overview)
    }

    /// Serves one stored artifact of this component.
    pub async fn download(&self, viewer: Viewer, address: &BlobAddress) -> Result<StoredBlob> {
        viewer.require_view_reports()?;
        if address.component != EXPORT_COMPONENT
            || ![EXPORT_AREA, ATTACHMENT_AREA].contains(&address.area.as_str())
        {
            return Err(ExportError::NotFound);
        }
        self.blobs.get(address).await?.ok_or(ExportError::NotFound)
    }

    /// Writes a zip of every export artifact of the quiz's finished attempts
    /// into `writer` and returns the archive's file name.
    ///
    /// Artifacts are deduplicated by file name.
    pub async fn package_zip<W>(&self, viewer: Viewer, quiz_id: i64, writer: W) -> Result<String>
    where
        W: Write + Seek,
    {
        viewer.require_any()?;
        let quiz = self.load_quiz(quiz_id).await?;

        let mut artifacts: BTreeMap<String, StoredBlob> = BTreeMap::new();
        for attempt in self.source.attempts(quiz_id).await? {
            if !counts_for_archive(&attempt) {
                continue;
            }
            for blob in self.export_artifacts(&quiz, attempt.id).await? {
                artifacts.insert(blob.address.filename.clone(), blob);
            }
        }

        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (filename, blob) in &artifacts {
            zip.start_file(filename.as_str(), options)?;
            zip.write_all(&blob.bytes)?;
        }
        zip.finish()?;

        let zip_name = format!("{}.zip", clean_filename(&quiz.name));
        info!(quiz_id, files = artifacts.len(), zip = %zip_name, "Packaged attempt exports");
        Ok(zip_name)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::export::MockSubjectExporter;
    use crate::job::JobStatus;
    use crate::queue::MemoryJobStore;
    use crate::source::{fixtures, AttemptState, JsonAttemptSource, SubjectRecord};
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    const GRADER: Viewer = Viewer {
        can_view_reports: true,
        can_grade: true,
    };
    const NOBODY: Viewer = Viewer {
        can_view_reports: false,
        can_grade: false,
    };

    fn outcome(attempt_id: i64) -> ExportOutcome {
        ExportOutcome {
            filename: format!("quiz_{}.pdf", attempt_id),
            content_hash: "hash".to_string(),
            bytes_len: 8,
            attachments: Vec::new(),
        }
    }

    fn attempt(id: i64, user_id: i64, state: AttemptState, preview: bool) -> SubjectRecord {
        let mut subject = fixtures::subject(id);
        subject.attempt.user_id = user_id;
        subject.attempt.state = state;
        subject.attempt.preview = preview;
        subject.user = fixtures::user(user_id);
        subject
    }

    struct Setup {
        dir: TempDir,
        blobs: Arc<FsBlobStore>,
        source: Arc<JsonAttemptSource>,
        queue: ExportJobQueue,
    }

    impl Setup {
        /// Attempts of quiz 3: 1 and 2 finished by user 10, 3 in progress by
        /// user 11, 4 a finished preview by user 12.
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for subject in [
                attempt(1, 10, AttemptState::Finished, false),
                attempt(2, 10, AttemptState::Finished, false),
                attempt(3, 11, AttemptState::InProgress, false),
                attempt(4, 12, AttemptState::Finished, true),
            ] {
                fixtures::write_snapshot(dir.path(), &subject, "<p>review</p>");
            }
            let blobs = Arc::new(FsBlobStore::new(dir.path().join("files")));
            let source = Arc::new(JsonAttemptSource::new(dir.path()));
            let queue = ExportJobQueue::new(Arc::new(MemoryJobStore::new()));
            Self {
                dir,
                blobs,
                source,
                queue,
            }
        }

        fn service(&self, exporter: MockSubjectExporter, autoexport: bool) -> ExportService {
            ExportService::new(
                self.source.clone(),
                self.blobs.clone(),
                self.queue.clone(),
                Arc::new(exporter),
                autoexport,
            )
        }

        fn add_attempt(&self, subject: &SubjectRecord) {
            fixtures::write_snapshot(self.dir.path(), subject, "<p>review</p>");
        }

        async fn store_export(&self, attempt_id: i64, filename: &str, bytes: &[u8]) {
            self.blobs
                .put(
                    &BlobAddress::new(40, EXPORT_COMPONENT, EXPORT_AREA, attempt_id, filename),
                    bytes,
                )
                .await
                .unwrap();
        }
    }

    fn idle_exporter() -> MockSubjectExporter {
        let mut exporter = MockSubjectExporter::new();
        exporter.expect_export().never();
        exporter
    }

    #[tokio::test]
    async fn test_submit_respects_autoexport() {
        let setup = Setup::new();
        assert!(setup.service(idle_exporter(), false).submit(1).await.unwrap().is_none());

        let job = setup.service(idle_exporter(), true).submit(1).await.unwrap().unwrap();
        assert_eq!(job.subject_id, 1);
        assert_eq!(
            setup.queue.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_reexport_requires_grade() {
        let setup = Setup::new();
        let viewer = Viewer {
            can_view_reports: true,
            can_grade: false,
        };
        let err = setup
            .service(idle_exporter(), false)
            .reexport(viewer, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::PermissionDenied("mod/quiz:grade")));
    }

    #[tokio::test]
    async fn test_reexport_all_reports_progress_and_continues() {
        let setup = Setup::new();
        let mut exporter = MockSubjectExporter::new();
        exporter.expect_export().times(3).returning(|attempt_id| {
            if attempt_id == 1 {
                Err(ExportError::Conversion("exit status 1".into()))
            } else {
                Ok(outcome(attempt_id))
            }
        });

        let mut events = Vec::new();
        let summary = setup
            .service(exporter, false)
            .reexport_all(GRADER, 3, |event| {
                events.push((event.current, event.total, event.attempt_id, event.result.is_ok()))
            })
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReexportSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(events, vec![(1, 3, 1, false), (2, 3, 2, true), (3, 3, 4, true)]);
    }

    #[tokio::test]
    async fn test_overview_lists_real_finished_attempts() {
        let setup = Setup::new();
        setup.store_export(1, "a.pdf", b"%PDF-a").await;

        let overview = setup
            .service(idle_exporter(), false)
            .overview(Viewer { can_view_reports: false, can_grade: true }, 3)
            .await
            .unwrap();

        let users: Vec<i64> = overview.iter().map(|user| user.user_id).collect();
        assert_eq!(users, vec![10, 11]);
        assert_eq!(overview[0].user_name, "Ada Lovelace");
        assert_eq!(overview[0].attempts.len(), 2);
        assert_eq!(overview[0].attempts[0].artifacts[0].filename, "a.pdf");
        assert!(overview[0].attempts[1].artifacts.is_empty());
        assert!(overview[1].attempts.is_empty());

        assert!(matches!(
            setup.service(idle_exporter(), false).overview(NOBODY, 3).await,
            Err(ExportError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_overview_keeps_previews_of_listed_users() {
        let setup = Setup::new();
        setup.add_attempt(&attempt(5, 10, AttemptState::Finished, true));
        setup.store_export(5, "preview.pdf", b"%PDF-p").await;

        let overview = setup
            .service(idle_exporter(), false)
            .overview(GRADER, 3)
            .await
            .unwrap();

        let listed: Vec<i64> = overview[0].attempts.iter().map(|a| a.attempt_id).collect();
        assert_eq!(listed, vec![1, 2, 5]);
        assert_eq!(overview[0].attempts[2].artifacts[0].filename, "preview.pdf");
        assert!(overview.iter().all(|user| user.user_id != 12));
    }

    #[tokio::test]
    async fn test_download_is_limited_to_export_areas() {
        let setup = Setup::new();
        setup.store_export(1, "a.pdf", b"%PDF-a").await;
        setup
            .blobs
            .put(&BlobAddress::new(40, "question", "questiontext", 1, "x.png"), b"png")
            .await
            .unwrap();
        let service = setup.service(idle_exporter(), false);

        let blob = service
            .download(GRADER, &BlobAddress::new(40, EXPORT_COMPONENT, EXPORT_AREA, 1, "a.pdf"))
            .await
            .unwrap();
        assert_eq!(blob.bytes, b"%PDF-a");

        let foreign = BlobAddress::new(40, "question", "questiontext", 1, "x.png");
        assert!(matches!(
            service.download(GRADER, &foreign).await,
            Err(ExportError::NotFound)
        ));
        let missing = BlobAddress::new(40, EXPORT_COMPONENT, EXPORT_AREA, 1, "b.pdf");
        assert!(matches!(
            service.download(GRADER, &missing).await,
            Err(ExportError::NotFound)
        ));
        let grader_only = Viewer {
            can_view_reports: false,
            can_grade: true,
        };
        assert!(matches!(
            service
                .download(grader_only, &BlobAddress::new(40, EXPORT_COMPONENT, EXPORT_AREA, 1, "a.pdf"))
                .await,
            Err(ExportError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_package_zip() {
        let setup = Setup::new();
        setup.store_export(1, "a.pdf", b"%PDF-a").await;
        setup.store_export(2, "b.pdf", b"%PDF-b").await;
        setup.store_export(4, "preview.pdf", b"%PDF-p").await;

        let mut buffer = Cursor::new(Vec::new());
        let name = setup
            .service(idle_exporter(), false)
            .package_zip(GRADER, 3, &mut buffer)
            .await
            .unwrap();
        assert_eq!(name, "Final Exam.zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(buffer.into_inner())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);

        let mut content = Vec::new();
        archive.by_name("b.pdf").unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"%PDF-b");
    }
}
