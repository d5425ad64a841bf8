//! Builds the self-contained HTML document the converter prints.
//!
//! The page is minimal: a fixed skeleton, a header table with
//! the attempt's metadata and the privileged review markup of every
//! question, rewritten by the type-specific transforms. A final inlining
//! pass embeds every image so the converter needs no session.

use askama::Template;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::error::Result;
use crate::html::{FragmentDispatcher, TransformContext};
use crate::inliner::AssetInliner;
use crate::overlay::OverlayRenderer;
use crate::source::{AttemptRecord, AttemptSource, QuizRecord, RenderOptions, SubjectRecord};

const DATE_FORMAT: &str = "%d.%m.%Y - %H:%M:%S";

/// Shown for values that do not exist yet, e.g. the grade of an ungraded attempt.
const NOT_AVAILABLE: &str = "-";

/// Keeps a question from starting right after a page break.
const NOBREAK_MARKER: &str = r#"<div class="nobreak">&#xFEFF;</div>"#;

static RIGHT_ANSWER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<div class="rightanswer">([^<]*?:)"#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Template)]
#[template(path = "pdf_header.html")]
pub struct HeaderSummary {
    pub course_name: String,
    pub quiz_name: String,
    pub student_name: String,
    pub matriculation_id: String,
    pub attempt_started: String,
    pub attempt_ended: String,
    pub attempt_result_summary: String,
}

impl HeaderSummary {
    pub fn from_subject(subject: &SubjectRecord) -> Self {
        let attempt = &subject.attempt;
        Self {
            course_name: subject.course.fullname.clone(),
            quiz_name: subject.quiz.name.clone(),
            student_name: subject.user.full_name(),
            matriculation_id: subject.user.idnumber.clone(),
            attempt_started: attempt.time_start.format(DATE_FORMAT).to_string(),
            attempt_ended: attempt
                .time_finish
                .map(|finished| finished.format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            attempt_result_summary: result_summary(attempt, &subject.quiz),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `"{achieved} of {max} marks ({percent}%)"`, scaled to the quiz grade.
fn result_summary(attempt: &AttemptRecord, quiz: &QuizRecord) -> String {
    let Some(marks) = attempt.sum_grades else {
        return NOT_AVAILABLE.to_string();
    };
    if quiz.sum_grades <= 0.0 || quiz.grade <= 0.0 {
        return NOT_AVAILABLE.to_string();
    }
    let max = round2(quiz.grade);
    let achieved = round2(marks * quiz.grade / quiz.sum_grades);
    let percent = (achieved / max * 100.0).round();
    format!("{:.2} of {:.2} marks ({}%)", achieved, max, percent)
}

#[derive(Template)]
#[template(path = "pdf_base.html")]
struct PdfPage<'a> {
    title: &'a str,
    header: &'a str,
    content: &'a str,
    additional_css: &'a str,
    mathjax: bool,
}

/// Structural cleanups of the host's review markup.
fn apply_fixups(html: &str) -> Result<String> {
    let html = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("div.que", |el| {
                el.before(NOBREAK_MARKER, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(RIGHT_ANSWER_LABEL
        .replace_all(&html, r#"<div class="rightanswer"><strong>$1</strong>"#)
        .into_owned())
}

pub struct DocumentAssembler {
    source: Arc<dyn AttemptSource>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: FragmentDispatcher,
    inliner: AssetInliner,
    overlay: OverlayRenderer,
    stack_plot_dir: PathBuf,
    mathjax: bool,
}

impl DocumentAssembler {
    pub fn new(
        source: Arc<dyn AttemptSource>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: FragmentDispatcher,
        inliner: AssetInliner,
        overlay: OverlayRenderer,
        stack_plot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            blobs,
            dispatcher,
            inliner,
            overlay,
            stack_plot_dir: stack_plot_dir.into(),
            mathjax: false,
        }
    }

    /// Loads MathJax into the page so formulas are typeset before printing.
    pub fn with_mathjax(mut self, enabled: bool) -> Self {
        self.mathjax = enabled;
        self
    }

    /// Returns the complete, self-contained document for `subject`.
    pub async fn assemble(&self, subject: &SubjectRecord) -> Result<String> {
        let header = HeaderSummary::from_subject(subject).render()?;

        let body = self
            .source
            .render_questions(subject, RenderOptions { privileged: true })
            .await?;
        let body = apply_fixups(&body)?;

        let ctx = TransformContext::new(
            subject,
            self.blobs.as_ref(),
            self.source.as_ref(),
            &self.overlay,
            &self.stack_plot_dir,
        );
        let outcome = self.dispatcher.dispatch(&body, &ctx).await?;
        debug!(
            attempt_id = subject.attempt.id,
            transformed = outcome.transformed,
            "Dispatched question fragments"
        );

        let title = format!("{} - {}", subject.quiz.name, subject.user.full_name());
        let page = PdfPage {
            title: &title,
            header: &header,
            content: &outcome.html,
            additional_css: &outcome.css,
            mathjax: self.mathjax,
        }
        .render()?;

        let document = self.inliner.inline(&page).await?;
        info!(
            attempt_id = subject.attempt.id,
            bytes = document.len(),
            "Assembled attempt document"
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::error::ExportError;
    use crate::html::markup::{collect_attribute, is_data_url};
    use crate::html::TransformRegistry;
    use crate::inliner::MockAssetFetcher;
    use crate::source::{fixtures, JsonAttemptSource};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_header_summary() {
        let header = HeaderSummary::from_subject(&fixtures::subject(4));
        assert_eq!(
            header,
            HeaderSummary {
                course_name: "Analysis I".to_string(),
                quiz_name: "Final: Exam?".to_string(),
                student_name: "Ada Lovelace".to_string(),
                matriculation_id: "M10".to_string(),
                attempt_started: "02.05.2024 - 09:00:00".to_string(),
                attempt_ended: "02.05.2024 - 10:30:15".to_string(),
                attempt_result_summary: "15.00 of 20.00 marks (75%)".to_string(),
            }
        );
    }

    #[test]
    fn test_ungraded_and_open_attempts() {
        let mut subject = fixtures::subject(4);
        subject.attempt.sum_grades = None;
        subject.attempt.time_finish = None;
        let header = HeaderSummary::from_subject(&subject);
        assert_eq!(header.attempt_result_summary, "-");
        assert_eq!(header.attempt_ended, "-");

        let mut subject = fixtures::subject(4);
        subject.quiz.sum_grades = 0.0;
        assert_eq!(HeaderSummary::from_subject(&subject).attempt_result_summary, "-");
    }

    #[test]
    fn test_header_is_escaped() {
        let mut subject = fixtures::subject(4);
        subject.course.fullname = "Physics <Lab>".to_string();
        let html = HeaderSummary::from_subject(&subject).render().unwrap();
        assert!(html.contains("Physics &#60;Lab&#62;") || html.contains("Physics &lt;Lab&gt;"));
        assert!(!html.contains("<Lab>"));
    }

    #[test]
    fn test_fixups() {
        let html = concat!(
            r#"<div class="que essay" id="question-4-1"><div class="content">"#,
            r#"<div class="rightanswer">The correct answer is: 42</div>"#,
            r#"</div></div>"#,
            r#"<div class="que multichoice" id="question-4-2"></div>"#
        );
        let output = apply_fixups(html).unwrap();

        assert_eq!(output.matches(NOBREAK_MARKER).count(), 2);
        assert!(output.starts_with(r#"<div class="nobreak">&#xFEFF;</div><div class="que essay""#));
        assert!(output.contains(
            r#"<div class="rightanswer"><strong>The correct answer is:</strong> 42</div>"#
        ));
    }

    fn assembler(dir: &TempDir, fetcher: MockAssetFetcher) -> DocumentAssembler {
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path().join("files")));
        let source: Arc<dyn AttemptSource> = Arc::new(JsonAttemptSource::new(dir.path()));
        let overlay = OverlayRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        let inliner = AssetInliner::new(
            Arc::clone(&blobs),
            Arc::new(fetcher),
            overlay.clone(),
            None,
        );
        DocumentAssembler::new(
            source,
            blobs,
            FragmentDispatcher::new(TransformRegistry::with_defaults()),
            inliner,
            overlay,
            dir.path().join("plots"),
        )
    }

    #[tokio::test]
    async fn test_assemble_full_document() {
        let dir = TempDir::new().unwrap();
        let subject = fixtures::subject(4);
        fixtures::write_snapshot(
            dir.path(),
            &subject,
            concat!(
                r#"<div class="que multichoice deferredfeedback" id="question-4-1"><div class="content">"#,
                r#"<div class="answer"><div class="r0 correct"><label>A</label><i class="icon fa fa-check"></i></div></div>"#,
                r#"<p><img src="https://cdn.example/logo.png"></p>"#,
                r#"</div></div>"#
            ),
        );
        let mut fetcher = MockAssetFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url| Err(ExportError::Fetch(format!("offline: {}", url))));

        let document = assembler(&dir, fetcher).assemble(&subject).await.unwrap();

        assert!(document.starts_with("<!DOCTYPE html>"));
        assert!(document.contains("<title>Final: Exam? - Ada Lovelace</title>"));
        assert!(document.contains("15.00 of 20.00 marks (75%)"));
        assert!(!document.contains("student view"));
        assert!(document.contains(NOBREAK_MARKER));
        assert!(document.contains(r#"class="correctnessicon""#));
        assert!(document.contains(".que.multichoice img.correctnessicon"));
        assert!(!document.contains("MathJax.js"));
        for src in collect_attribute(&document, "img", "src").unwrap() {
            assert!(is_data_url(&src), "not embedded: {}", src);
        }
    }

    #[tokio::test]
    async fn test_mathjax_is_loaded_when_enabled() {
        let dir = TempDir::new().unwrap();
        let subject = fixtures::subject(5);
        fixtures::write_snapshot(dir.path(), &subject, "<p>\\(x^2\\)</p>");
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().never();

        let document = assembler(&dir, fetcher)
            .with_mathjax(true)
            .assemble(&subject)
            .await
            .unwrap();
        assert!(document.contains("MathJax.js"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_fails() {
        let dir = TempDir::new().unwrap();
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().never();

        let err = assembler(&dir, fetcher)
            .assemble(&fixtures::subject(6))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::SubjectNotFound(6)));
    }
}
