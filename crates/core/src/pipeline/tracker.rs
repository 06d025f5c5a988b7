use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::manifest::{Manifest, MarkerState};
use super::{ArtifactResult, JobContext, PipelineDeps, PipelineError, Stage, TerminalError};
use crate::audit::{emit_optional, AuditEvent};
use crate::config::PipelineConfig;
use crate::job::{ExportKind, JobKind, JobStatus};
use crate::metrics;

/// An export a pipeline publishes: a file relative to the job directory,
/// or the directory itself when `file` is empty.
pub(crate) type ExportSpec = (ExportKind, &'static str);

/// Apply the marker rules before any network or compute work.
///
/// Returns the cached result when a verified marker exists. A marker that
/// fails verification is removed so the stages run again.
pub(crate) async fn check_marker(
    deps: &PipelineDeps,
    ctx: &JobContext,
    kind: JobKind,
    dir: &Path,
    exports: &[ExportSpec],
) -> Result<Option<ArtifactResult>, PipelineError> {
    let job_id = ctx.job.id.as_str();

    if ctx.from_start {
        info!(job_id = %job_id, dir = %dir.display(), "Starting from scratch");
        deps.store.clear_artifacts(job_id)?;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::stage(Stage::Persist, e)),
        }
        return Ok(None);
    }

    let manifest = match Manifest::check(dir).await {
        MarkerState::Absent => return Ok(None),
        MarkerState::Invalid(reason) => {
            warn!(job_id = %job_id, reason = %reason, "Discarding incomplete completion marker");
            Manifest::remove(dir)
                .await
                .map_err(|e| PipelineError::stage(Stage::Persist, e))?;
            return Ok(None);
        }
        MarkerState::Valid(manifest) => manifest,
    };

    for (export_kind, file) in exports {
        if deps.store.get_export(job_id, *export_kind)?.is_some() {
            continue;
        }
        let (path, size) = if file.is_empty() {
            (dir.to_path_buf(), manifest.total_size_bytes)
        } else {
            match manifest.artifact(file) {
                Some(artifact) => (dir.join(file), artifact.size_bytes),
                None => continue,
            }
        };
        deps.store.save_export(job_id, *export_kind, &path, size)?;
    }

    let from = ctx.job.status;
    deps.store.update_status(job_id, JobStatus::Done, None)?;
    deps.progress
        .notify(job_id, JobStatus::Done.as_str(), Some("cached".to_string()));
    emit_optional(
        deps.audit.as_ref(),
        AuditEvent::JobCompleted {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            output_dir: dir.display().to_string(),
            cached: true,
        },
    )
    .await;
    debug!(job_id = %job_id, from = %from, "Completion marker verified, skipping stages");

    Ok(Some(ArtifactResult {
        job_id: job_id.to_string(),
        kind,
        output_dir: dir.to_path_buf(),
        exports: deps.store.list_exports(job_id)?,
        cached: true,
    }))
}

/// Raise a terminal error when known metadata is over the configured ceilings.
pub(crate) fn check_limits(
    config: &PipelineConfig,
    size_bytes: Option<u64>,
    duration_secs: Option<f64>,
) -> Result<(), TerminalError> {
    if let Some(size) = size_bytes {
        if size > config.max_file_bytes() {
            return Err(TerminalError::LimitExceeded(format!(
                "payload is {} MB, limit is {} MB",
                size / (1024 * 1024),
                config.max_file_mb
            )));
        }
    }
    if let Some(duration) = duration_secs {
        if duration > config.max_duration_secs as f64 {
            return Err(TerminalError::LimitExceeded(format!(
                "duration is {}s, limit is {}s",
                duration.round() as u64,
                config.max_duration_secs
            )));
        }
    }
    Ok(())
}

/// Publishes stage transitions and times each stage.
pub(crate) struct StageTracker<'a> {
    deps: &'a PipelineDeps,
    job_id: &'a str,
    kind: JobKind,
    status: JobStatus,
    entered_at: Option<Instant>,
}

impl<'a> StageTracker<'a> {
    pub fn new(deps: &'a PipelineDeps, ctx: &'a JobContext, kind: JobKind) -> Self {
        Self {
            deps,
            job_id: &ctx.job.id,
            kind,
            status: ctx.job.status,
            entered_at: None,
        }
    }

    /// Move the job to an in-progress status.
    pub async fn enter(&mut self, status: JobStatus) -> Result<(), PipelineError> {
        self.observe_current();
        self.transition(status).await?;
        self.entered_at = Some(Instant::now());
        Ok(())
    }

    /// Write the marker, record the exports and mark the job done.
    pub async fn complete(
        mut self,
        dir: &Path,
        manifest: &mut Manifest,
        exports: &[ExportSpec],
    ) -> Result<ArtifactResult, PipelineError> {
        manifest
            .write_atomic(dir)
            .await
            .map_err(|e| PipelineError::stage(Stage::Persist, e))?;

        for (export_kind, file) in exports {
            let (path, size): (PathBuf, u64) = if file.is_empty() {
                (dir.to_path_buf(), manifest.total_size_bytes)
            } else {
                match manifest.artifact(file) {
                    Some(artifact) => (dir.join(file), artifact.size_bytes),
                    None => continue,
                }
            };
            self.deps
                .store
                .save_export(self.job_id, *export_kind, &path, size)?;
        }

        self.observe_current();
        self.transition(JobStatus::Done).await?;

        emit_optional(
            self.deps.audit.as_ref(),
            AuditEvent::JobCompleted {
                job_id: self.job_id.to_string(),
                kind: self.kind.to_string(),
                output_dir: dir.display().to_string(),
                cached: false,
            },
        )
        .await;
        info!(
            job_id = %self.job_id,
            kind = %self.kind,
            artifacts = manifest.artifacts.len(),
            bytes = manifest.total_size_bytes,
            "Job complete"
        );

        Ok(ArtifactResult {
            job_id: self.job_id.to_string(),
            kind: self.kind,
            output_dir: dir.to_path_buf(),
            exports: self.deps.store.list_exports(self.job_id)?,
            cached: false,
        })
    }

    async fn transition(&mut self, status: JobStatus) -> Result<(), PipelineError> {
        if self
            .deps
            .store
            .advance_status(self.job_id, status, None)?
            .is_none()
        {
            info!(job_id = %self.job_id, stage = %status, "Job cancelled during attempt");
            return Err(PipelineError::Cancelled);
        }
        self.deps.progress.notify_status(self.job_id, status);
        debug!(job_id = %self.job_id, from = %self.status, to = %status, "Stage transition");

        emit_optional(
            self.deps.audit.as_ref(),
            AuditEvent::JobStatusChanged {
                job_id: self.job_id.to_string(),
                from_status: self.status.to_string(),
                to_status: status.to_string(),
                reason: None,
            },
        )
        .await;
        self.status = status;
        Ok(())
    }

    fn observe_current(&mut self) {
        if let Some(started) = self.entered_at.take() {
            metrics::observe_stage(self.kind.as_str(), self.status.as_str(), started);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        let config = PipelineConfig::default()
            .with_max_file_mb(1)
            .with_max_duration_secs(60);

        assert!(check_limits(&config, Some(1024), Some(59.0)).is_ok());
        assert!(check_limits(&config, None, None).is_ok());
        assert!(matches!(
            check_limits(&config, Some(2 * 1024 * 1024), None),
            Err(TerminalError::LimitExceeded(_))
        ));
        assert!(matches!(
            check_limits(&config, None, Some(61.0)),
            Err(TerminalError::LimitExceeded(_))
        ));
    }
}
