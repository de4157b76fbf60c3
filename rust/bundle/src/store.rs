use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use snafu::{ResultExt, Snafu};

use crate::bundle::{Bundle, BundleStatus};

pub const STATE_FILE_NAME: &str = "state.json";
pub const ARCHIVE_FILE_NAME: &str = "file.zip";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("bundle {id:?} not found"))]
    NotFound { id: String },

    #[snafu(display("bundle {id:?} already exists"))]
    Conflict { id: String },

    #[snafu(display("work directory {path:?} is not a directory"))]
    WorkDirNotADirectory { path: PathBuf },

    #[snafu(display("failed to enumerate work directory {path:?}"))]
    EnumerateWorkDir { source: io::Error, path: PathBuf },

    #[snafu(display("failed to reserve directory for bundle {id:?}"))]
    ReserveBundleDir { source: io::Error, id: String },

    #[snafu(display("failed to serialize state for bundle {id:?}"))]
    SerializeState { source: serde_json::Error, id: String },

    #[snafu(display("failed to write state for bundle {id:?}"))]
    WriteState { source: io::Error, id: String },

    #[snafu(display("failed to read state for bundle {id:?}"))]
    ReadState { source: io::Error, id: String },

    #[snafu(display("failed to parse state for bundle {id:?}"))]
    ParseState { source: serde_json::Error, id: String },

    #[snafu(display("failed to remove archive for bundle {id:?}"))]
    RemoveArchive { source: io::Error, id: String },
}

/// On-disk layout of the bundle store:
///
/// ```text
/// <work-dir>/<id>/state.json
/// <work-dir>/<id>/file.zip
/// ```
///
/// Stateless besides the filesystem. State writes go through a temp file
/// plus atomic rename, so readers never observe a partial `state.json`.
#[derive(Clone, Debug)]
pub struct BundleStore {
    work_dir: PathBuf,
}

impl BundleStore {
    pub fn open(work_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let work_dir = work_dir.into();
        if !work_dir.is_dir() {
            return WorkDirNotADirectorySnafu { path: work_dir }.fail();
        }
        Ok(Self { work_dir })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn bundle_dir(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }

    pub fn state_path(&self, id: &str) -> PathBuf {
        self.bundle_dir(id).join(STATE_FILE_NAME)
    }

    pub fn archive_path(&self, id: &str) -> PathBuf {
        self.bundle_dir(id).join(ARCHIVE_FILE_NAME)
    }

    /// Claims `<work-dir>/<id>/` for a new bundle.
    pub fn reserve(&self, id: &str) -> Result<(), Error> {
        match fs::create_dir(self.bundle_dir(id)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                ConflictSnafu { id }.fail()
            }
            Err(error) => Err(error).context(ReserveBundleDirSnafu { id }),
        }
    }

    pub fn write_state(&self, bundle: &Bundle) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(bundle).context(SerializeStateSnafu {
            id: &bundle.id,
        })?;
        let tmp = self
            .bundle_dir(&bundle.id)
            .join(format!("{STATE_FILE_NAME}.tmp"));
        fs::write(&tmp, data).context(WriteStateSnafu { id: &bundle.id })?;
        fs::rename(&tmp, self.state_path(&bundle.id)).context(WriteStateSnafu { id: &bundle.id })
    }

    /// Reads the persisted state without reconciling it against the archive.
    /// The directory name is authoritative for `id`.
    pub fn read_state(&self, id: &str) -> Result<Bundle, Error> {
        let raw = match fs::read(self.state_path(id)) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return NotFoundSnafu { id }.fail();
            }
            Err(error) => return Err(error).context(ReadStateSnafu { id }),
        };
        let mut bundle: Bundle = serde_json::from_slice(&raw).context(ParseStateSnafu { id })?;
        bundle.id = id.to_string();
        Ok(bundle)
    }

    pub fn get(&self, id: &str) -> Result<Bundle, Error> {
        Ok(self.reconcile(self.read_state(id)?))
    }

    /// Aligns `size` and `status` with the archive file on disk.
    ///
    /// A bundle whose state claims an archive but has none is reported as
    /// Unknown; the persisted state is left untouched so a later observer
    /// sees the same demotion. A Done bundle whose recorded size is stale
    /// gets the corrected size persisted in place.
    fn reconcile(&self, mut bundle: Bundle) -> Bundle {
        match bundle.status {
            BundleStatus::Started | BundleStatus::InProgress | BundleStatus::Done => {
                match fs::metadata(self.archive_path(&bundle.id)) {
                    Ok(meta) => {
                        if bundle.size != meta.len() {
                            bundle.size = meta.len();
                            if bundle.status == BundleStatus::Done {
                                if let Err(error) = self.write_state(&bundle) {
                                    tracing::warn!(
                                        bundle.id = %bundle.id,
                                        error = &error as &dyn std::error::Error,
                                        "failed to persist reconciled size"
                                    );
                                }
                            }
                        }
                    }
                    Err(_) => {
                        bundle.status = BundleStatus::Unknown;
                        bundle.size = 0;
                    }
                }
            }
            BundleStatus::Failed => {
                bundle.size = fs::metadata(self.archive_path(&bundle.id))
                    .map(|meta| meta.len())
                    .unwrap_or(0);
            }
            BundleStatus::Unknown | BundleStatus::Canceled | BundleStatus::Deleted => {}
        }
        bundle
    }

    /// Enumerates every bundle under the work directory. Ids whose state is
    /// unreadable yield a synthetic Unknown record; non-directory entries
    /// are skipped.
    pub fn list(&self) -> Result<Vec<Bundle>, Error> {
        let entries = fs::read_dir(&self.work_dir).context(EnumerateWorkDirSnafu {
            path: &self.work_dir,
        })?;
        let mut bundles = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "skipping unreadable work directory entry"
                    );
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.get(&id) {
                Ok(bundle) => bundles.push(bundle),
                Err(error) => {
                    tracing::debug!(
                        bundle.id = %id,
                        error = &error as &dyn std::error::Error,
                        "bundle state unreadable, reporting Unknown"
                    );
                    bundles.push(Bundle::unknown(id));
                }
            }
        }
        Ok(bundles)
    }

    /// Removes the archive and persists the Deleted tombstone. Returns the
    /// resulting record plus whether anything changed; deleting a bundle
    /// that is already Canceled or Deleted changes nothing. `force` tombstones
    /// a Canceled bundle anyway, for the caller that canceled a running
    /// build as part of this very delete.
    pub fn delete(&self, id: &str, force: bool) -> Result<(Bundle, bool), Error> {
        let mut bundle = self.read_state(id)?;
        let unchanged = if force {
            bundle.status == BundleStatus::Deleted
        } else {
            matches!(
                bundle.status,
                BundleStatus::Canceled | BundleStatus::Deleted
            )
        };
        if unchanged {
            return Ok((bundle, false));
        }
        self.remove_archive(id)?;
        if !bundle.status.is_terminal() {
            bundle.stopped_at = Utc::now();
        }
        bundle.status = BundleStatus::Deleted;
        bundle.size = 0;
        self.write_state(&bundle)?;
        Ok((bundle, true))
    }

    pub fn remove_archive(&self, id: &str) -> Result<(), Error> {
        match fs::remove_file(self.archive_path(id)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).context(RemoveArchiveSnafu { id }),
        }
    }
}
