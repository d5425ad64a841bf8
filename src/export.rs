//! Export of one attempt: assemble, convert, hash and persist.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::assembler::DocumentAssembler;
use crate::attachments::{write_if_missing, AttachmentExporter, ExportedAttachment};
use crate::blob::{content_hash, BlobAddress, BlobStore, EXPORT_AREA, EXPORT_COMPONENT};
use crate::config::ExportConfig;
use crate::converter::{render_pdf, ConversionOptions, Converter};
use crate::error::{ExportError, Result};
use crate::html::markup::clean_filename;
use crate::html::{FragmentDispatcher, TransformRegistry};
use crate::inliner::{AssetFetcher, AssetInliner};
use crate::overlay::OverlayRenderer;
use crate::source::{AttemptSource, SubjectRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub filename: String,
    pub content_hash: String,
    pub bytes_len: usize,
    pub attachments: Vec<ExportedAttachment>,
}

/// Something that can export an attempt by id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubjectExporter: Send + Sync {
    async fn export(&self, attempt_id: i64) -> Result<ExportOutcome>;
}

/// Settings of [`AttemptExporter`] taken from [`ExportConfig`].
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub temp_dir: PathBuf,
    pub export_filesystem: bool,
    pub pdf_export_dir: Option<PathBuf>,
    pub conversion: ConversionOptions,
}

impl ExportSettings {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            export_filesystem: config.export_filesystem,
            pdf_export_dir: config.pdf_export_dir.clone(),
            conversion: ConversionOptions {
                javascript_delay: config.javascript_delay(),
                timeout: config.conversion_timeout(),
                ..ConversionOptions::default()
            },
        }
    }
}

/// `{quiz}_{username}_{attempt}_{YYYYmmddHHMMSS}_{sha256}.pdf`
pub fn export_filename(subject: &SubjectRecord, hash: &str) -> String {
    clean_filename(&format!(
        "{}_{}_{}_{}_{}.pdf",
        subject.quiz.name,
        subject.user.username,
        subject.attempt.id,
        Utc::now().format("%Y%m%d%H%M%S"),
        hash
    ))
}

/// Checks the mirror root and returns the course directory inside it.
async fn prepare_mirror(root: Option<&Path>, course_id: i64) -> Result<PathBuf> {
    let root = root.ok_or_else(|| ExportError::config("PDF_EXPORT_DIR", "not set"))?;
    let metadata = match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => metadata,
        Ok(_) => return Err(ExportError::DirectoryMissing(root.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExportError::DirectoryMissing(root.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    if metadata.permissions().readonly() {
        return Err(ExportError::DirectoryNotWritable(root.to_path_buf()));
    }
    let course_dir = root.join(course_id.to_string());
    tokio::fs::create_dir_all(&course_dir).await?;
    Ok(course_dir)
}

pub struct AttemptExporter {
    source: Arc<dyn AttemptSource>,
    blobs: Arc<dyn BlobStore>,
    assembler: DocumentAssembler,
    converter: Arc<dyn Converter>,
    settings: ExportSettings,
}

impl AttemptExporter {
    pub fn new(
        source: Arc<dyn AttemptSource>,
        blobs: Arc<dyn BlobStore>,
        assembler: DocumentAssembler,
        converter: Arc<dyn Converter>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            source,
            blobs,
            assembler,
            converter,
            settings,
        }
    }

    /// Wires the full pipeline with the built-in transforms.
    pub fn from_config(
        config: &ExportConfig,
        source: Arc<dyn AttemptSource>,
        blobs: Arc<dyn BlobStore>,
        converter: Arc<dyn Converter>,
        fetcher: Arc<dyn AssetFetcher>,
        overlay: OverlayRenderer,
    ) -> Self {
        let inliner = AssetInliner::new(
            Arc::clone(&blobs),
            fetcher,
            overlay.clone(),
            config.site_url.clone(),
        );
        let assembler = DocumentAssembler::new(
            Arc::clone(&source),
            Arc::clone(&blobs),
            FragmentDispatcher::new(TransformRegistry::with_defaults()),
            inliner,
            overlay,
            config.stack_plot_dir.clone(),
        )
        .with_mathjax(config.mathjax_enable);
        Self::new(
            source,
            blobs,
            assembler,
            converter,
            ExportSettings::from_config(config),
        )
    }
}

#[async_trait]
impl SubjectExporter for AttemptExporter {
    async fn export(&self, attempt_id: i64) -> Result<ExportOutcome> {
        let subject = self.source.load_subject(attempt_id).await?;

        let mirror_dir = if self.settings.export_filesystem {
            Some(prepare_mirror(self.settings.pdf_export_dir.as_deref(), subject.course.id).await?)
        } else {
            None
        };

        let html = self.assembler.assemble(&subject).await?;
        let pdf = render_pdf(
            self.converter.as_ref(),
            &html,
            &self.settings.temp_dir,
            &self.settings.conversion,
        )
        .await?;

        let hash = content_hash(&pdf);
        let filename = export_filename(&subject, &hash);
        let address = BlobAddress::new(
            subject.quiz.context_id,
            EXPORT_COMPONENT,
            EXPORT_AREA,
            subject.attempt.id,
            filename.clone(),
        );
        self.blobs.put(&address, &pdf).await?;
        if let Some(dir) = &mirror_dir {
            write_if_missing(&dir.join(&filename), &pdf).await?;
        }

        let attachments = AttachmentExporter::new(Arc::clone(&self.blobs), mirror_dir)
            .export(&subject)
            .await?;

        info!(
            attempt_id,
            filename = %filename,
            bytes = pdf.len(),
            attachments = attachments.len(),
            "Exported attempt"
        );
        Ok(ExportOutcome {
            filename,
            content_hash: hash,
            bytes_len: pdf.len(),
            attachments,
        })
    }
}
