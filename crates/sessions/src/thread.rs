//! Append-only JSONL thread files.
//!
//! Each thread gets a `<threadId>.jsonl` file under the threads directory.
//! Every finished run is appended as a single JSON line.
//!
//! Includes an in-memory write-through cache to avoid re-reading from disk
//! on every resume, and async I/O wrappers to avoid blocking the tokio
//! runtime.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sy_domain::content::ContentPart;
use sy_domain::error::{Error, Result};
use sy_domain::session::CodeSessions;
use sy_domain::trace::TraceEvent;

/// One persisted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    /// `completed`, `failed` or `stopped`.
    pub status: String,
    pub user_message: String,
    #[serde(default)]
    pub content_parts: Vec<ContentPart>,
    /// Content-part index → originating agent id.
    #[serde(default)]
    pub agent_map: BTreeMap<usize, String>,
    /// Agent id → display name, for re-labeling.
    #[serde(default)]
    pub agent_names: BTreeMap<String, String>,
    /// Code sessions as they stood when the run finished.
    #[serde(default)]
    pub code_sessions: CodeSessions,
}

/// Reads and appends thread files with a write-through cache.
pub struct ThreadStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<StoredRun>>>,
}

impl ThreadStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed.
    pub fn open(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn new_thread_id() -> String {
        format!("thread_{}", uuid::Uuid::new_v4().simple())
    }

    /// Append a run to its thread (sync).
    pub fn append(&self, run: &StoredRun) -> Result<()> {
        let path = self.thread_path(&run.thread_id)?;
        let buf = serialize_line(run)?;

        // Write to disk first, only update cache if I/O succeeds.
        write_line(&path, &buf)?;
        self.cache_append(run);
        Ok(())
    }

    /// Append a run to its thread (async).
    ///
    /// Uses `spawn_blocking` to avoid blocking the tokio runtime during file I/O.
    pub async fn append_async(&self, run: &StoredRun) -> Result<()> {
        let path = self.thread_path(&run.thread_id)?;
        let buf = serialize_line(run)?;

        tokio::task::spawn_blocking(move || write_line(&path, &buf))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        self.cache_append(run);
        Ok(())
    }

    /// Read back a thread. Returns cached runs if available, otherwise loads
    /// from disk and populates the cache.
    pub fn read(&self, thread_id: &str) -> Result<Vec<StoredRun>> {
        if let Some(runs) = self.cache.read().get(thread_id) {
            return Ok(runs.clone());
        }

        let path = self.thread_path(thread_id)?;
        let runs = read_jsonl_file(&path, thread_id)?;
        self.cache.write().insert(thread_id.to_owned(), runs.clone());
        Ok(runs)
    }

    /// Read back a thread (async).
    pub async fn read_async(&self, thread_id: &str) -> Result<Vec<StoredRun>> {
        if let Some(runs) = self.cache.read().get(thread_id) {
            return Ok(runs.clone());
        }

        let path = self.thread_path(thread_id)?;
        let tid = thread_id.to_owned();
        let runs = tokio::task::spawn_blocking(move || read_jsonl_file(&path, &tid))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        self.cache.write().insert(thread_id.to_owned(), runs.clone());
        Ok(runs)
    }

    /// Code sessions carried by the most recent run of a thread.
    pub fn latest_code_sessions(&self, thread_id: &str) -> Result<CodeSessions> {
        Ok(self
            .read(thread_id)?
            .into_iter()
            .last()
            .map(|r| r.code_sessions)
            .unwrap_or_default())
    }

    /// Thread ids with a file on disk, sorted.
    pub fn list_threads(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    // ── Private helpers ───────────────────────────────────────────────

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self.base_dir.join(format!("{thread_id}.jsonl")))
    }

    fn cache_append(&self, run: &StoredRun) {
        // Only extend an already-loaded entry. A cold thread is read in full
        // from disk on first access, which already includes this run.
        if let Some(runs) = self.cache.write().get_mut(&run.thread_id) {
            runs.push(run.clone());
        }

        TraceEvent::ThreadAppend {
            thread_id: run.thread_id.clone(),
            lines: 1,
        }
        .emit();
    }
}

/// Thread ids become file names; only `[A-Za-z0-9_-]` is accepted.
fn validate_thread_id(thread_id: &str) -> Result<()> {
    let ok = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid thread id '{thread_id}'")))
    }
}

fn serialize_line(run: &StoredRun) -> Result<String> {
    let mut json = serde_json::to_string(run)
        .map_err(|e| Error::Other(format!("serializing stored run: {e}")))?;
    json.push('\n');
    Ok(json)
}

fn write_line(path: &Path, buf: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(buf.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

/// Read and parse a JSONL thread file.
fn read_jsonl_file(path: &Path, thread_id: &str) -> Result<Vec<StoredRun>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut runs = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredRun>(line) {
            Ok(run) => runs.push(run),
            Err(e) => {
                tracing::warn!(
                    thread_id = thread_id,
                    error = %e,
                    "skipping malformed thread line"
                );
            }
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::session::{merge_into, ArtifactFile};

    fn run(thread_id: &str, n: usize) -> StoredRun {
        let mut agent_map = BTreeMap::new();
        agent_map.insert(0, "agent_a".to_string());
        StoredRun {
            run_id: format!("run_{n}"),
            thread_id: thread_id.into(),
            timestamp: Utc::now(),
            status: "completed".into(),
            user_message: format!("message {n}"),
            content_parts: vec![ContentPart::text(format!("reply {n}"))],
            agent_map,
            agent_names: BTreeMap::new(),
            code_sessions: CodeSessions::new(),
        }
    }

    #[test]
    fn append_then_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        store.append(&run("t1", 1)).unwrap();
        store.append(&run("t1", 2)).unwrap();

        let runs = store.read("t1").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].run_id, "run_2");
        assert_eq!(runs[0].agent_map.get(&0).map(String::as_str), Some("agent_a"));
    }

    #[test]
    fn cache_stays_in_sync_after_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        store.append(&run("t1", 1)).unwrap();
        assert_eq!(store.read("t1").unwrap().len(), 1);
        store.append(&run("t1", 2)).unwrap();
        assert_eq!(store.read("t1").unwrap().len(), 2);

        // A fresh store sees the same data on disk.
        let reopened = ThreadStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read("t1").unwrap().len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        store.append(&run("t1", 1)).unwrap();
        write_line(&dir.path().join("t1.jsonl"), "{not json}\n").unwrap();
        store.append(&run("t1", 2)).unwrap();

        let reopened = ThreadStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read("t1").unwrap().len(), 2);
    }

    #[test]
    fn unknown_thread_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        assert!(store.read("missing").unwrap().is_empty());
        assert!(store.latest_code_sessions("missing").unwrap().is_empty());
    }

    #[test]
    fn path_like_thread_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        assert!(store.read("../etc/passwd").is_err());
        assert!(store.append(&run("a/b", 1)).is_err());
    }

    #[test]
    fn latest_code_sessions_come_from_last_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        let mut second = run("t1", 2);
        merge_into(
            &mut second.code_sessions,
            "execute_code",
            "s2",
            vec![ArtifactFile { name: "a.csv".into(), id: None }],
        );
        store.append(&run("t1", 1)).unwrap();
        store.append(&second).unwrap();

        let sessions = store.latest_code_sessions("t1").unwrap();
        assert_eq!(sessions["execute_code"].session_id, "s2");
        assert_eq!(store.list_threads().unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn async_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::open(dir.path()).unwrap();
        store.append_async(&run("t2", 1)).await.unwrap();
        let runs = store.read_async("t2").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].user_message, "message 1");
    }
}
