//! Boundary to the host application that owns attempts, users and quizzes.
//!
//! The exporter never talks to the host's database directly. Everything it
//! needs about an attempt is delivered through an [`AttemptSource`], and the
//! question review markup is rendered by the host on request.
//! [`JsonAttemptSource`] serves pre-rendered JSON snapshots from disk so the
//! worker can run stand-alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{ExportError, Result};

/// Label used when a referenced user no longer exists.
pub const DELETED_USER_LABEL: &str = "Deleted user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    /// Matriculation number.
    #[serde(default)]
    pub idnumber: String,
    #[serde(default)]
    pub deleted: bool,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: i64,
    pub fullname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRecord {
    pub id: i64,
    pub course_id: i64,
    /// Module context the quiz's files live in.
    pub context_id: i64,
    pub name: String,
    /// Maximum grade the quiz is scaled to.
    pub grade: f64,
    /// Sum of the maximum marks of all questions.
    pub sum_grades: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    InProgress,
    Overdue,
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub state: AttemptState,
    #[serde(default)]
    pub preview: bool,
    pub time_start: DateTime<Utc>,
    pub time_finish: Option<DateTime<Utc>>,
    /// Sum of the marks achieved, `None` while ungraded.
    pub sum_grades: Option<f64>,
}

impl AttemptRecord {
    pub fn is_finished(&self) -> bool {
        self.state == AttemptState::Finished
    }
}

/// State of one question attempt step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Todo,
    Invalid,
    Complete,
    GaveUp,
    GradedRight,
    GradedPartial,
    GradedWrong,
    MangrRight,
    MangrPartial,
    MangrWrong,
    Finished,
    #[serde(other)]
    Other,
}

impl StepState {
    /// Whether the step records a manual grading action.
    pub fn is_manual_grade(self) -> bool {
        matches!(
            self,
            StepState::MangrRight | StepState::MangrPartial | StepState::MangrWrong
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptStep {
    pub id: i64,
    pub state: StepState,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub user_id: i64,
}

/// A draggable choice. For image drags `id` is the item the drag image is
/// stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragChoice {
    pub id: i64,
    pub text: String,
}

/// Drop zone of a drag-and-drop-onto-image question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropPlace {
    pub group: u32,
    pub xy: (i64, i64),
}

/// Drop zone of a marker question; `shape` is `rectangle`, `circle` or
/// `polygon`, `coords` the stored coordinate string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPlace {
    pub group: u32,
    pub shape: String,
    pub coords: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragDropImageQuestion {
    pub id: i64,
    pub context_id: i64,
    /// group -> choice key -> choice.
    pub choices: BTreeMap<u32, BTreeMap<u32, DragChoice>>,
    pub places: BTreeMap<u32, DropPlace>,
    /// place -> correct choice key within the place's group.
    pub right_choices: BTreeMap<u32, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragMarkerQuestion {
    pub id: i64,
    pub context_id: i64,
    pub choices: BTreeMap<u32, BTreeMap<u32, DragChoice>>,
    pub places: BTreeMap<u32, MarkerPlace>,
    pub right_choices: BTreeMap<u32, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragWordsQuestion {
    pub choices: BTreeMap<u32, BTreeMap<u32, DragChoice>>,
}

/// The parts of a question definition the transforms need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuestionDefinition {
    DdImageOrText(DragDropImageQuestion),
    DdMarker(DragMarkerQuestion),
    Ddwtos(DragWordsQuestion),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub slot: u32,
    pub qtype: String,
    #[serde(default)]
    pub steps: Vec<AttemptStep>,
    #[serde(default = "other_question")]
    pub question: QuestionDefinition,
}

fn other_question() -> QuestionDefinition {
    QuestionDefinition::Other
}

/// Everything known about the attempt being exported.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    pub attempt: AttemptRecord,
    pub user: UserRecord,
    pub course: CourseRecord,
    pub quiz: QuizRecord,
    pub slots: Vec<SlotRecord>,
}

impl SubjectRecord {
    pub fn slot(&self, slot: u32) -> Option<&SlotRecord> {
        self.slots.iter().find(|record| record.slot == slot)
    }
}

/// Options for the host's question rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Render as an administrator so right answers and correctness are visible.
    pub privileged: bool,
}

#[async_trait]
pub trait AttemptSource: Send + Sync {
    /// Loads an attempt with its user, course, quiz and question data.
    async fn load_subject(&self, attempt_id: i64) -> Result<SubjectRecord>;

    /// Renders the review markup of every question slot of the attempt.
    async fn render_questions(
        &self,
        subject: &SubjectRecord,
        options: RenderOptions,
    ) -> Result<String>;

    async fn user(&self, user_id: i64) -> Result<Option<UserRecord>>;

    async fn quiz(&self, quiz_id: i64) -> Result<Option<QuizRecord>>;

    /// All attempts of a quiz, including unfinished and preview attempts.
    async fn attempts(&self, quiz_id: i64) -> Result<Vec<AttemptRecord>>;

    /// Display name of a user, or the deleted-user label.
    async fn user_display_name(&self, user_id: i64) -> Result<String> {
        Ok(match self.user(user_id).await? {
            Some(user) if !user.deleted => user.full_name(),
            _ => DELETED_USER_LABEL.to_string(),
        })
    }
}

/// On-disk snapshot of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub attempt: AttemptRecord,
    pub user: Option<UserRecord>,
    pub course: CourseRecord,
    pub quiz: QuizRecord,
    #[serde(default)]
    pub slots: Vec<SlotRecord>,
    /// Review markup as the attempt owner sees it.
    pub review_html: String,
    /// Review markup rendered with administrative visibility.
    #[serde(default)]
    pub privileged_review_html: Option<String>,
    /// Further users referenced by the attempt, e.g. graders.
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// Attempt source reading `{dir}/{attempt_id}.json` snapshots.
pub struct JsonAttemptSource {
    dir: PathBuf,
}

impl JsonAttemptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn snapshot(&self, attempt_id: i64) -> Result<Option<AttemptSnapshot>> {
        let path = self.dir.join(format!("{}.json", attempt_id));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn all_snapshots(&self) -> Result<Vec<AttemptSnapshot>> {
        let mut snapshots = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<AttemptSnapshot>(&bytes) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable attempt snapshot")
                }
            }
        }
        snapshots.sort_by_key(|snapshot| snapshot.attempt.id);
        Ok(snapshots)
    }
}

#[async_trait]
impl AttemptSource for JsonAttemptSource {
    async fn load_subject(&self, attempt_id: i64) -> Result<SubjectRecord> {
        let snapshot = self
            .snapshot(attempt_id)
            .await?
            .ok_or(ExportError::SubjectNotFound(attempt_id))?;
        let user = snapshot
            .user
            .ok_or(ExportError::UserNotFound(snapshot.attempt.user_id))?;
        debug!(attempt_id, slots = snapshot.slots.len(), "Loaded attempt snapshot");
        Ok(SubjectRecord {
            attempt: snapshot.attempt,
            user,
            course: snapshot.course,
            quiz: snapshot.quiz,
            slots: snapshot.slots,
        })
    }

    async fn render_questions(
        &self,
        subject: &SubjectRecord,
        options: RenderOptions,
    ) -> Result<String> {
        let snapshot = self
            .snapshot(subject.attempt.id)
            .await?
            .ok_or(ExportError::SubjectNotFound(subject.attempt.id))?;
        if options.privileged {
            if let Some(html) = snapshot.privileged_review_html {
                return Ok(html);
            }
        }
        Ok(snapshot.review_html)
    }

    async fn user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        for snapshot in self.all_snapshots().await? {
            let found = snapshot
                .user
                .into_iter()
                .chain(snapshot.users)
                .find(|user| user.id == user_id);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    async fn quiz(&self, quiz_id: i64) -> Result<Option<QuizRecord>> {
        Ok(self
            .all_snapshots()
            .await?
            .into_iter()
            .map(|snapshot| snapshot.quiz)
            .find(|quiz| quiz.id == quiz_id))
    }

    async fn attempts(&self, quiz_id: i64) -> Result<Vec<AttemptRecord>> {
        Ok(self
            .all_snapshots()
            .await?
            .into_iter()
            .map(|snapshot| snapshot.attempt)
            .filter(|attempt| attempt.quiz_id == quiz_id)
            .collect())
    }
}
