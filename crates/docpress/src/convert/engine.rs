//! Exclusive access to the office rendering engine.
//!
//! The engine can only work on one document at a time. [`EngineHandle`]
//! hands out a single [`EngineLease`] at once; a lease opens
//! [`DocumentSession`]s, which close their document when dropped. Drop order
//! guarantees the document is released before the lease on every exit path,
//! unwinding included.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tempfile::TempDir;

use crate::convert::process::run_to_completion;
use crate::error::{EngineError, StorageError};
use crate::queue::Deadline;
use crate::sanitize;
use crate::storage::{list_files, move_file};

/// A document-rendering engine able to load documents for export.
pub trait OfficeEngine: Send + Sync {
    fn load<'a>(&'a self, path: &Path) -> Result<Box<dyn LoadedDocument + 'a>, EngineError>;
}

/// A document opened by an [`OfficeEngine`].
pub trait LoadedDocument {
    /// Exports the document to `output` using the engine's export identifier.
    fn save_as(
        &mut self,
        output: &Path,
        export_id: &str,
        deadline: &Deadline,
    ) -> Result<(), EngineError>;

    fn close(&mut self) {}
}

pub struct EngineHandle {
    engine: Box<dyn OfficeEngine>,
    lock: Mutex<()>,
    leases_granted: AtomicU64,
}

impl EngineHandle {
    pub fn new<E: OfficeEngine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
            lock: Mutex::new(()),
            leases_granted: AtomicU64::new(0),
        }
    }

    /// Blocks until the engine is free.
    pub fn lease(&self) -> EngineLease<'_> {
        let guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Office engine lock was poisoned by a panicking job, recovering");
                poisoned.into_inner()
            }
        };
        self.leases_granted.fetch_add(1, Ordering::Relaxed);
        EngineLease {
            _guard: guard,
            engine: self.engine.as_ref(),
        }
    }

    /// Total number of leases handed out so far.
    pub fn leases_granted(&self) -> u64 {
        self.leases_granted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("leases_granted", &self.leases_granted())
            .finish_non_exhaustive()
    }
}

/// Exclusive right to use the engine. Released on drop.
pub struct EngineLease<'a> {
    _guard: MutexGuard<'a, ()>,
    engine: &'a dyn OfficeEngine,
}

impl EngineLease<'_> {
    pub fn open(&self, path: &Path) -> Result<DocumentSession<'_>, EngineError> {
        let document = self.engine.load(path)?;
        tracing::debug!(file = %sanitize::redact_path(path), "Document loaded");
        Ok(DocumentSession { document })
    }
}

/// An open document. Closed on drop.
pub struct DocumentSession<'a> {
    document: Box<dyn LoadedDocument + 'a>,
}

impl DocumentSession<'_> {
    pub fn save_as(
        &mut self,
        output: &Path,
        export_id: &str,
        deadline: &Deadline,
    ) -> Result<(), EngineError> {
        let _span = tracing::debug_span!(
            "engine.export",
            export_id = %export_id,
            output = %sanitize::redact_path(output)
        )
        .entered();
        self.document.save_as(output, export_id, deadline)
    }
}

impl Drop for DocumentSession<'_> {
    fn drop(&mut self) {
        self.document.close();
    }
}

/// LibreOffice in headless mode, one `soffice` process per export.
pub struct SofficeEngine {
    program: PathBuf,
    profile: TempDir,
}

impl SofficeEngine {
    /// `office_path` is the LibreOffice `program/` directory.
    pub fn new(office_path: &Path) -> Result<Self, EngineError> {
        let profile = tempfile::Builder::new()
            .prefix("docpress-office-profile-")
            .tempdir()
            .map_err(|e| StorageError::CreateDirectory {
                path: std::env::temp_dir(),
                source: e,
            })?;

        Ok(Self {
            program: office_path.join("soffice"),
            profile,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn export_command(&self, source: &Path, export_id: &str, out_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!(
                "-env:UserInstallation=file://{}",
                self.profile.path().display()
            ))
            .arg("--convert-to")
            .arg(export_id)
            .arg("--outdir")
            .arg(out_dir)
            .arg(source);
        command
    }
}

impl OfficeEngine for SofficeEngine {
    fn load<'a>(&'a self, path: &Path) -> Result<Box<dyn LoadedDocument + 'a>, EngineError> {
        if !self.program.is_file() {
            return Err(EngineError::NotInstalled(self.program.clone()));
        }
        if !path.is_file() {
            return Err(EngineError::Load {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        Ok(Box::new(SofficeDocument {
            engine: self,
            source: path.to_path_buf(),
        }))
    }
}

struct SofficeDocument<'a> {
    engine: &'a SofficeEngine,
    source: PathBuf,
}

impl LoadedDocument for SofficeDocument<'_> {
    fn save_as(
        &mut self,
        output: &Path,
        export_id: &str,
        deadline: &Deadline,
    ) -> Result<(), EngineError> {
        // soffice picks the output name itself, so export into a private dir first
        let out_dir = tempfile::Builder::new()
            .prefix("docpress-export-")
            .tempdir()
            .map_err(|e| StorageError::CreateDirectory {
                path: std::env::temp_dir(),
                source: e,
            })?;

        let command = self
            .engine
            .export_command(&self.source, export_id, out_dir.path());
        run_to_completion(command, deadline).map_err(|e| EngineError::Export {
            filter: export_id.to_string(),
            source: e,
        })?;

        let produced = list_files(out_dir.path())?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::MissingOutput(self.source.clone()))?;
        move_file(&produced, output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEngine {
        closed: Arc<AtomicBool>,
    }

    struct RecordingDocument {
        closed: Arc<AtomicBool>,
    }

    impl OfficeEngine for RecordingEngine {
        fn load<'a>(&'a self, _path: &Path) -> Result<Box<dyn LoadedDocument + 'a>, EngineError> {
            Ok(Box::new(RecordingDocument {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    impl LoadedDocument for RecordingDocument {
        fn save_as(&mut self, output: &Path, _: &str, _: &Deadline) -> Result<(), EngineError> {
            std::fs::write(output, b"exported").map_err(|e| StorageError::WriteFile {
                path: output.to_path_buf(),
                source: e,
            })?;
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_session_closes_document_on_drop() {
        let engine = RecordingEngine::default();
        let closed = Arc::clone(&engine.closed);
        let handle = EngineHandle::new(engine);
        let temp_dir = tempfile::TempDir::new().unwrap();

        {
            let lease = handle.lease();
            let mut session = lease.open(Path::new("input.docx")).unwrap();
            session
                .save_as(&temp_dir.path().join("out.pdf"), "pdf", &Deadline::none())
                .unwrap();
            assert!(!closed.load(Ordering::SeqCst));
        }

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(handle.leases_granted(), 1);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let handle = Arc::new(EngineHandle::new(RecordingEngine::default()));
        let active = Arc::new(AtomicU64::new(0));
        let max_active = Arc::new(AtomicU64::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                thread::spawn(move || {
                    let _lease = handle.lease();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(handle.leases_granted(), 4);
    }

    #[test]
    fn test_lease_recovers_from_poison() {
        let handle = Arc::new(EngineHandle::new(RecordingEngine::default()));

        let poisoner = Arc::clone(&handle);
        let result = thread::spawn(move || {
            let _lease = poisoner.lease();
            panic!("job panicked while holding the engine");
        })
        .join();
        assert!(result.is_err());

        let lease = handle.lease();
        assert!(lease.open(Path::new("again.docx")).is_ok());
    }

    #[test]
    fn test_soffice_not_installed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let engine = SofficeEngine::new(&temp_dir.path().join("missing")).unwrap();

        let result = engine.load(Path::new("input.docx"));
        assert!(matches!(result, Err(EngineError::NotInstalled(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_soffice_export_moves_produced_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let program_dir = temp_dir.path().join("program");
        std::fs::create_dir_all(&program_dir).unwrap();

        // Writes "<stem>.out" into the directory following --outdir.
        let script = program_dir.join("soffice");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             while [ \"$1\" != \"--outdir\" ]; do shift; done\n\
             out=\"$2\"; src=\"$3\"\n\
             name=$(basename \"$src\")\n\
             printf converted > \"$out/${name%.*}.out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = temp_dir.path().join("report.docx");
        std::fs::write(&source, b"docx").unwrap();
        let output = temp_dir.path().join("report.docx.pdf");

        let engine = SofficeEngine::new(&program_dir).unwrap();
        let mut document = engine.load(&source).unwrap();
        document.save_as(&output, "pdf", &Deadline::none()).unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "converted");
    }
}
