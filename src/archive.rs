//! Archival of templates and applied payloads.
//!
//! After a successful commit or execution the template source and the
//! rendered payload can be saved as
//! `{timestamp}__{template}__{device}{ext}`. Archival never fails a job;
//! errors are logged and reflected in the status suffix.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::Result;
use crate::profile::JobSpec;

/// Commit archive extension for the template source.
pub const COMMIT_TEMPLATE_EXT: &str = ".j2";
/// Commit archive extension for the applied set commands.
pub const COMMIT_PAYLOAD_EXT: &str = ".set";
/// Execute archive extension for the template source.
pub const EXEC_TEMPLATE_EXT: &str = ".exec.j2";
/// Execute archive extension for the rendered code.
pub const EXEC_PAYLOAD_EXT: &str = ".exec";

/// Status suffix reported when archival failed.
pub const ARCHIVE_ERROR_SUFFIX: &str = ", archive error, see log";

/// Content to archive.
#[derive(Debug, Clone, Copy)]
pub enum ArchiveSource<'a> {
    /// Copy an existing file
    File(&'a Path),
    /// Write text
    Text(&'a str),
}

/// Destination of archived artifacts.
pub trait ArchiveSink: Send + Sync {
    /// Save `source` to `destination`
    fn save(&self, source: ArchiveSource<'_>, destination: &Path) -> Result<()>;
}

/// Filesystem sink creating missing directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArchive;

impl ArchiveSink for FsArchive {
    fn save(&self, source: ArchiveSource<'_>, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match source {
            ArchiveSource::File(path) => {
                std::fs::copy(path, destination)?;
            }
            ArchiveSource::Text(text) => std::fs::write(destination, text)?,
        }
        Ok(())
    }
}

/// Archive file name for one artifact
pub fn archive_file_name(timestamp: &str, template: &str, device: &str, ext: &str) -> String {
    format!("{}__{}__{}{}", timestamp, template, device, ext)
}

/// Applies the job's archival flags against a sink.
#[derive(Clone)]
pub struct Archiver {
    sink: Arc<dyn ArchiveSink>,
    commit_dir: PathBuf,
    exec_dir: PathBuf,
}

impl Archiver {
    /// Create an archiver writing commit and execute artifacts to their directories
    pub fn new(sink: Arc<dyn ArchiveSink>, commit_dir: PathBuf, exec_dir: PathBuf) -> Self {
        Self {
            sink,
            commit_dir,
            exec_dir,
        }
    }

    /// Archive after a commit, returning the status suffix
    pub fn archive_commit(&self, job: &JobSpec, template_path: &Path, payload: &str) -> String {
        let result = self.archive_pair(
            job,
            &self.commit_dir,
            (job.archive.commit_template, COMMIT_TEMPLATE_EXT),
            (job.archive.commit_payload, COMMIT_PAYLOAD_EXT),
            template_path,
            payload,
        );
        match result {
            Ok((true, true)) => ", j2+set-cmd archived".to_string(),
            Ok((true, false)) => ", j2 template archived".to_string(),
            Ok((false, true)) => ", set-cmd archived".to_string(),
            Ok((false, false)) => String::new(),
            Err(e) => {
                error!(device = %job.device, template = %job.template, error = %e, "Error archiving commit artifacts");
                ARCHIVE_ERROR_SUFFIX.to_string()
            }
        }
    }

    /// Archive after an execution, returning the log suffix
    pub fn archive_exec(&self, job: &JobSpec, template_path: &Path, code: &str) -> String {
        let result = self.archive_pair(
            job,
            &self.exec_dir,
            (job.archive.exec_template, EXEC_TEMPLATE_EXT),
            (job.archive.exec_payload, EXEC_PAYLOAD_EXT),
            template_path,
            code,
        );
        match result {
            Ok((true, true)) => ", exec j2+code archived".to_string(),
            Ok((true, false)) => ", j2 exec template archived".to_string(),
            Ok((false, true)) => ", exec code archived".to_string(),
            Ok((false, false)) => String::new(),
            Err(e) => {
                error!(device = %job.device, template = %job.template, error = %e, "Error archiving execute artifacts");
                ARCHIVE_ERROR_SUFFIX.to_string()
            }
        }
    }

    fn archive_pair(
        &self,
        job: &JobSpec,
        dir: &Path,
        (save_template, template_ext): (bool, &str),
        (save_payload, payload_ext): (bool, &str),
        template_path: &Path,
        payload: &str,
    ) -> Result<(bool, bool)> {
        if save_template {
            let dest = dir.join(archive_file_name(
                &job.timestamp,
                &job.template,
                &job.device,
                template_ext,
            ));
            self.sink.save(ArchiveSource::File(template_path), &dest)?;
            debug!(path = %dest.display(), "Archived template");
        }
        if save_payload {
            let dest = dir.join(archive_file_name(
                &job.timestamp,
                &job.template,
                &job.device,
                payload_ext,
            ));
            self.sink.save(ArchiveSource::Text(payload), &dest)?;
            debug!(path = %dest.display(), "Archived payload");
        }
        Ok((save_template, save_payload))
    }
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("commit_dir", &self.commit_dir)
            .field("exec_dir", &self.exec_dir)
            .finish()
    }
}
