//! HTML to PDF conversion through an external wkhtmltopdf process.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ExportError, Result};

/// Magic bytes every PDF file starts with.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Options passed to the converter for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub enable_local_file_access: bool,
    pub enable_external_links: bool,
    pub outline: bool,
    /// Time given to in-page JavaScript (MathJax typesetting) before printing.
    pub javascript_delay: Option<Duration>,
    /// `None` lets the process run for as long as it takes.
    pub timeout: Option<Duration>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            enable_local_file_access: true,
            enable_external_links: true,
            outline: false,
            javascript_delay: None,
            timeout: None,
        }
    }
}

/// Black-box HTML to PDF converter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Converter: Send + Sync {
    /// Renders `html` into a PDF file at `output`.
    async fn convert(&self, html: &str, output: &Path, options: &ConversionOptions) -> Result<()>;
}

/// Converter that shells out to the wkhtmltopdf binary.
pub struct WkhtmltopdfConverter {
    binary: PathBuf,
    temp_dir: PathBuf,
}

impl WkhtmltopdfConverter {
    pub fn new(binary: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            temp_dir: temp_dir.into(),
        }
    }

    fn arguments(options: &ConversionOptions, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["--quiet".to_string(), "--images".to_string()];
        if !options.outline {
            args.push("--no-outline".to_string());
        }
        if options.enable_local_file_access {
            args.push("--enable-local-file-access".to_string());
        }
        if options.enable_external_links {
            args.push("--enable-external-links".to_string());
        }
        if let Some(delay) = options.javascript_delay {
            args.push("--javascript-delay".to_string());
            args.push(delay.as_millis().to_string());
        }
        args.push(input.display().to_string());
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl Converter for WkhtmltopdfConverter {
    async fn convert(&self, html: &str, output: &Path, options: &ConversionOptions) -> Result<()> {
        info!(output = %output.display(), "Converting HTML to PDF");

        let input = tempfile::Builder::new()
            .prefix("attempt-export-")
            .suffix(".html")
            .tempfile_in(&self.temp_dir)?;
        tokio::fs::write(input.path(), html).await?;

        let mut command = Command::new(&self.binary);
        command
            .args(Self::arguments(options, input.path(), output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            ExportError::Conversion(format!(
                "failed to start {}: {}",
                self.binary.display(),
                err
            ))
        })?;

        let finished = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExportError::ConversionTimeout(limit))?,
            None => child.wait_with_output().await,
        }?;

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            return Err(ExportError::Conversion(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                finished.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Runs the converter into a temporary PDF and returns its bytes.
///
/// A converter error is tolerated when a non-empty PDF was still written,
/// except a timeout. An empty, missing or non-PDF output is always an error.
pub async fn render_pdf(
    converter: &dyn Converter,
    html: &str,
    temp_dir: &Path,
    options: &ConversionOptions,
) -> Result<Vec<u8>> {
    let output = temp_dir.join(format!("{}.pdf", Uuid::new_v4()));
    let result = converter.convert(html, &output, options).await;
    let bytes = read_output(&output).await;
    if let Err(err) = tokio::fs::remove_file(&output).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %output.display(), error = %err, "Failed to remove temporary PDF");
        }
    }

    match (result, bytes) {
        (Ok(()), Some(bytes)) => Ok(bytes),
        (Ok(()), None) => Err(ExportError::EmptyOutput(output)),
        (Err(err @ ExportError::ConversionTimeout(_)), _) => Err(err),
        (Err(err), Some(bytes)) => {
            warn!(error = %err, bytes = bytes.len(), "Converter reported an error but produced output");
            Ok(bytes)
        }
        (Err(err), None) => Err(err),
    }
}

/// Reads the converter output, rejecting anything that is not a non-empty PDF.
async fn read_output(path: &Path) -> Option<Vec<u8>> {
    let bytes = tokio::fs::read(path).await.ok()?;
    if bytes.is_empty() || !bytes.starts_with(PDF_MAGIC) {
        return None;
    }
    Some(bytes)
}
