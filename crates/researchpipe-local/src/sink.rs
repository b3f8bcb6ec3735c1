//! Report sinks: markdown on disk, and PDF via a pandoc shellout.

use researchpipe_core::{Error, ReportSink, Result};
use std::path::PathBuf;
use tracing::debug;

/// Writes the report as a markdown file under a fixed directory.
#[derive(Debug, Clone)]
pub struct MarkdownFileSink {
    dir: PathBuf,
}

impl MarkdownFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl ReportSink for MarkdownFileSink {
    fn name(&self) -> &'static str {
        "markdown"
    }

    async fn write(&self, content: &str, name: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Sink(format!("create {}: {e}", self.dir.display())))?;
        let path = self.dir.join(format!("{name}.md"));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Sink(format!("write {}: {e}", path.display())))?;
        Ok(path.display().to_string())
    }
}

/// Renders the report to PDF by shelling out to pandoc. A missing pandoc
/// binary is `NotConfigured`, so the engine records it and moves on to the
/// other sinks.
#[derive(Debug, Clone)]
pub struct PandocPdfSink {
    dir: PathBuf,
}

impl PandocPdfSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl ReportSink for PandocPdfSink {
    fn name(&self) -> &'static str {
        "pandoc-pdf"
    }

    async fn write(&self, content: &str, name: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Sink(format!("create {}: {e}", self.dir.display())))?;
        let out_path = self.dir.join(format!("{name}.pdf"));

        let mut tmp = tempfile::Builder::new()
            .prefix("researchpipe-")
            .suffix(".md")
            .tempfile()
            .map_err(|e| Error::Sink(format!("report tempfile: {e}")))?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())
            .map_err(|e| Error::Sink(format!("report tempfile write: {e}")))?;

        let status = tokio::process::Command::new("pandoc")
            .arg(tmp.path())
            .arg("-o")
            .arg(&out_path)
            .status()
            .await;
        match status {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotConfigured("pandoc not installed".to_string()))
            }
            Err(e) => Err(Error::Sink(format!("pandoc spawn: {e}"))),
            Ok(s) if !s.success() => Err(Error::Sink(format!("pandoc exit {s}"))),
            Ok(_) => {
                debug!(path = %out_path.display(), "pdf rendered");
                Ok(out_path.display().to_string())
            }
        }
    }
}
