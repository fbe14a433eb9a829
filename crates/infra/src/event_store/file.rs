//! Filesystem-backed job store.
//!
//! Layout under the store root:
//!
//! ```text
//! jobs/<job_id>/events.jsonl   one JSON record per line: seq, type, timestamp, payload
//! jobs/<job_id>/lease.json     latest lease record (inspection only)
//! jobs/<job_id>/append.lock    present while an append is in progress
//! ```
//!
//! Every write goes through a temp file that is fsynced and renamed over the
//! target, so a reader sees either the previous log or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use jobward_core::{ExpectedVersion, JobError, JobId, JobResult};
use jobward_events::{EventRecord, JobEvent, LeaseRecord};

use super::r#trait::{EventStore, EventStream, unknown_job};

const EVENTS_FILE: &str = "events.jsonl";
const LEASE_FILE: &str = "lease.json";
const LOCK_FILE: &str = "append.lock";
const RECLAIM_FILE: &str = "append.lock.reclaim";

/// Lock files older than this are considered abandoned by a crashed writer.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct FileEventStore {
    root: PathBuf,
}

impl FileEventStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one job's files. Used for export and inspection.
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join("jobs").join(job_id.as_str())
    }

    fn events_path(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id).join(EVENTS_FILE)
    }

    /// Read the materialized lease record, if any.
    pub fn read_lease(&self, job_id: &JobId) -> JobResult<Option<LeaseRecord>> {
        let path = self.job_dir(job_id).join(LEASE_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                JobError::corrupt_log(format!("unreadable lease record: {e}"))
                    .with_detail("path", path.display().to_string())
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Open the log for streaming; fails if the job was never created.
    fn open_log(&self, job_id: &JobId) -> JobResult<RecordLines> {
        let path = self.events_path(job_id);
        match File::open(&path) {
            Ok(file) => Ok(RecordLines::new(file, path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.job_dir(job_id).is_dir() {
                    // Directory claimed but the first record never landed.
                    Err(JobError::corrupt_log("job directory has no event log")
                        .with_detail("job_id", job_id.to_string()))
                } else {
                    Err(unknown_job(job_id))
                }
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, err: io::Error) -> JobError {
    JobError::from(err).with_detail("path", path.display().to_string())
}

fn encode_line(record: &EventRecord) -> JobResult<Vec<u8>> {
    let mut line = serde_json::to_vec(record)
        .map_err(|e| JobError::invalid_input(format!("record serialization failed: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Durable replace: temp file in the same directory, fsync, rename, fsync dir.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = dir.join(format!(".{name}.{}.tmp", Uuid::now_v7()));

    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        File::open(dir)?.sync_all()
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Exclusive per-job append lock backed by an `O_EXCL` lock file.
struct AppendLock {
    path: PathBuf,
}

impl AppendLock {
    fn acquire(dir: &Path) -> JobResult<Self> {
        let path = dir.join(LOCK_FILE);
        let started = SystemTime::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        if Self::reclaim(&path).map_err(|e| io_error(&path, e))? {
                            continue;
                        }
                    }
                    let waited = started.elapsed().unwrap_or_default();
                    if waited >= LOCK_WAIT {
                        return Err(JobError::io_failure("timed out waiting for append lock")
                            .with_detail("path", path.display().to_string()));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(io_error(&path, e)),
            }
        }
    }

    /// Remove an abandoned lock. Returns whether it was removed.
    ///
    /// Waiters serialize on a reclaim marker and re-check staleness under it,
    /// so a lock created by whoever reclaimed first is never deleted.
    fn reclaim(path: &Path) -> io::Result<bool> {
        let marker = path.with_file_name(RECLAIM_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Held only for a stat and an unlink; an old one is a crash leftover.
                if Self::is_stale(&marker) {
                    let _ = fs::remove_file(&marker);
                }
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let removed = if Self::is_stale(path) {
            warn!(path = %path.display(), "removing stale append lock");
            match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e),
            }
        } else {
            Ok(false)
        };
        let _ = fs::remove_file(&marker);
        removed
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > STALE_LOCK_AFTER)
    }
}

impl Drop for AppendLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Lazily parses `events.jsonl`, enforcing gap-free sequencing.
///
/// Stops after the first error so corruption is surfaced exactly once.
struct RecordLines {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    next_seq: u64,
    failed: bool,
}

impl RecordLines {
    fn new(file: File, path: PathBuf) -> Self {
        Self {
            lines: BufReader::new(file).lines(),
            path,
            next_seq: 0,
            failed: false,
        }
    }

    fn corrupt(&self, msg: String) -> JobError {
        JobError::corrupt_log(msg)
            .with_detail("path", self.path.display().to_string())
            .with_detail("line", self.next_seq + 1)
    }
}

impl Iterator for RecordLines {
    type Item = JobResult<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(e) => {
                self.failed = true;
                return Some(Err(io_error(&self.path, e)));
            }
        };

        let parsed = serde_json::from_str::<EventRecord>(&line)
            .map_err(|e| self.corrupt(format!("malformed event record: {e}")))
            .and_then(|record| {
                if record.seq == self.next_seq {
                    Ok(record)
                } else {
                    Err(self.corrupt(format!(
                        "non-monotonic sequence: expected {}, found {}",
                        self.next_seq, record.seq
                    )))
                }
            });

        match parsed {
            Ok(record) => {
                self.next_seq += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl EventStore for FileEventStore {
    fn create_job(
        &self,
        job_id: &JobId,
        initial: &JobEvent,
        timestamp: DateTime<Utc>,
    ) -> JobResult<EventRecord> {
        let jobs = self.root.join("jobs");
        fs::create_dir_all(&jobs).map_err(|e| io_error(&jobs, e))?;

        let dir = self.job_dir(job_id);
        if let Err(e) = fs::create_dir(&dir) {
            return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                JobError::already_exists(format!("job {job_id} already exists"))
                    .with_detail("job_id", job_id.to_string())
            } else {
                io_error(&dir, e)
            });
        }

        let record = EventRecord::new(0, timestamp, initial)?;
        let path = self.events_path(job_id);
        write_atomic(&path, &encode_line(&record)?).map_err(|e| io_error(&path, e))?;
        debug!(job_id = %job_id, path = %path.display(), "job created");
        Ok(record)
    }

    fn append(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        timestamp: DateTime<Utc>,
        expected_version: ExpectedVersion,
    ) -> JobResult<EventRecord> {
        let dir = self.job_dir(job_id);
        if !dir.is_dir() {
            return Err(unknown_job(job_id));
        }
        let _lock = AppendLock::acquire(&dir)?;

        // Validate the whole log before extending it.
        let mut current = 0u64;
        for record in self.open_log(job_id)? {
            record?;
            current += 1;
        }
        expected_version.check(current)?;

        let path = self.events_path(job_id);
        let mut bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
        if bytes.last().is_some_and(|b| *b != b'\n') {
            bytes.push(b'\n');
        }
        let record = EventRecord::new(current, timestamp, event)?;
        bytes.extend(encode_line(&record)?);
        write_atomic(&path, &bytes).map_err(|e| io_error(&path, e))?;

        debug!(job_id = %job_id, seq = record.seq, event_type = %record.event_type, "event appended");
        Ok(record)
    }

    fn read_events(&self, job_id: &JobId) -> JobResult<EventStream> {
        Ok(Box::new(self.open_log(job_id)?))
    }

    fn job_exists(&self, job_id: &JobId) -> bool {
        self.job_dir(job_id).is_dir()
    }

    fn write_lease(&self, job_id: &JobId, lease: &LeaseRecord) -> JobResult<()> {
        let path = self.job_dir(job_id).join(LEASE_FILE);
        let bytes = serde_json::to_vec_pretty(lease)
            .map_err(|e| JobError::invalid_input(format!("lease serialization failed: {e}")))?;
        write_atomic(&path, &bytes).map_err(|e| io_error(&path, e))
    }
}
