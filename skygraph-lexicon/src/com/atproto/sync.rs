use chrono::{DateTime, Utc};
use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposCommitOperation {
    pub path: String,
    pub action: String,
    pub cid: Option<Cid>,
}

/// Represents an update of repository state. Note that empty commits are allowed,
/// which include no repo data changes, but an update to rev and signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposCommit {
    pub seq: i64,
    pub time: DateTime<Utc>,
    pub rebase: bool,
    #[serde(rename = "tooBig")]
    pub too_big: bool,
    pub repo: String,
    pub commit: Cid,
    pub rev: String,
    pub since: Option<String>,
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    pub ops: Vec<SubscribeReposCommitOperation>,
    pub blobs: Vec<String>,
}

/// DEPRECATED -- Use #identity event instead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposHandle {
    pub did: String,
    pub handle: String,
    pub seq: i64,
    pub time: DateTime<Utc>,
}

/// Represents a change to an account's identity. Could be an updated handle, signing key, or
/// pds hosting endpoint. Serves as a prod to all downstream services to refresh their identity cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposIdentity {
    pub did: String,
    pub handle: Option<String>,
    pub seq: i64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposAccount {
    pub seq: i64,
    pub did: String,
    pub time: DateTime<Utc>,
    pub active: bool,
    pub status: Option<AccountStatus>,
}

/// If active=false, this optional field indicates a reason for why the account is not active.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Takendown,
    Suspended,
    Deleted,
    Deactivated,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// DEPRECATED -- Use #account event instead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposTombstone {
    pub did: String,
    pub seq: i64,
    pub time: DateTime<Utc>,
}

/// An informational frame from the relay, e.g. OutdatedCursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReposInfo {
    pub name: String,
    pub message: Option<String>,
}

#[derive(Debug)]
pub enum SubscribeRepos {
    Commit(SubscribeReposCommit),
    Identity(SubscribeReposIdentity),
    Account(SubscribeReposAccount),
    Handle(SubscribeReposHandle),
    Tombstone(SubscribeReposTombstone),
    Info(SubscribeReposInfo),
}

impl SubscribeRepos {
    /// Relay sequence number carried by this message, if any. Info frames
    /// are not sequenced.
    pub fn seq(&self) -> Option<i64> {
        match self {
            SubscribeRepos::Commit(m) => Some(m.seq),
            SubscribeRepos::Identity(m) => Some(m.seq),
            SubscribeRepos::Account(m) => Some(m.seq),
            SubscribeRepos::Handle(m) => Some(m.seq),
            SubscribeRepos::Tombstone(m) => Some(m.seq),
            SubscribeRepos::Info(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Takedown,
    Suspended,
    Deactivated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefRepo {
    pub did: String,
    // Current repo commit CID
    pub head: String,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RepoStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListReposOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub repos: Vec<RefRepo>,
}
