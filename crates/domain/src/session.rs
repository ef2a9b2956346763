//! Code-session context for stateful tools.
//!
//! A stateful tool (a code sandbox, for instance) reports the session it ran
//! in and the files that session produced. The engine keeps one
//! [`CodeSessionContext`] per tool name and merges each new report into it,
//! so files survive across calls and across runs of the same thread.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code sessions of a run or thread, keyed by tool name.
pub type CodeSessions = BTreeMap<String, CodeSessionContext>;

/// A file as reported by a tool artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A file tracked in a code session, stamped with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSessionContext {
    pub session_id: String,
    #[serde(default)]
    pub files: Vec<SessionFile>,
    pub last_updated: DateTime<Utc>,
}

impl CodeSessionContext {
    pub fn new(session_id: impl Into<String>, files: Vec<ArtifactFile>) -> Self {
        let session_id = session_id.into();
        let files = stamp(&session_id, files);
        Self { session_id, files, last_updated: Utc::now() }
    }

    /// Merge a new tool report into this session.
    ///
    /// The reported session id becomes current. Existing files whose name is
    /// not re-emitted are kept in their original order; reported files follow,
    /// stamped with the reporting session id. An empty report keeps every
    /// existing file.
    pub fn merge(&mut self, session_id: &str, files: Vec<ArtifactFile>) {
        let reported: Vec<SessionFile> = stamp(session_id, files);
        self.files.retain(|f| !reported.iter().any(|r| r.name == f.name));
        self.files.extend(reported);
        self.session_id = session_id.to_owned();
        self.last_updated = Utc::now();
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn file(&self, name: &str) -> Option<&SessionFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Merge a tool report into `sessions`, creating the entry on first use.
pub fn merge_into<'a>(
    sessions: &'a mut CodeSessions,
    tool_name: &str,
    session_id: &str,
    files: Vec<ArtifactFile>,
) -> &'a CodeSessionContext {
    let entry = sessions
        .entry(tool_name.to_owned())
        .or_insert_with(|| CodeSessionContext::new(session_id, Vec::new()));
    entry.merge(session_id, files);
    entry
}

fn stamp(session_id: &str, files: Vec<ArtifactFile>) -> Vec<SessionFile> {
    let mut out: Vec<SessionFile> = Vec::with_capacity(files.len());
    for f in files {
        // A name reported twice in one batch keeps the later entry.
        out.retain(|existing| existing.name != f.name);
        out.push(SessionFile { name: f.name, id: f.id, session_id: session_id.to_owned() });
    }
    out
}
