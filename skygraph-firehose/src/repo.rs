use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Signed repo commit at the root of a getRepo CAR. The signature is not
/// verified here; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub did: String,
    pub version: u8,
    pub data: Cid,
    pub rev: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MstNode {
    l: Option<Cid>,
    e: Vec<MstEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MstEntry {
    p: usize,
    #[serde(with = "serde_bytes")]
    k: Vec<u8>,
    v: Cid,
    t: Option<Cid>,
}

/// A record leaf of the repo tree: `<collection>/<rkey>` plus the CID of its
/// block.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub key: String,
    pub cid: Cid,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("block {0} missing from CAR")]
    MissingBlock(Cid),
    #[error("invalid block {cid}: {reason}")]
    InvalidBlock { cid: Cid, reason: String },
    #[error("entry key is not valid utf-8")]
    InvalidKey,
}

/// Decode the signed commit at `root` and walk its MST, returning every
/// record leaf in key order.
pub fn walk(
    blocks: &HashMap<Cid, Vec<u8>>,
    root: &Cid,
) -> Result<(Commit, Vec<RecordEntry>), RepoError> {
    let commit: Commit = decode(blocks, root)?;
    let mut entries = Vec::new();
    walk_node(blocks, &commit.data, &mut entries)?;
    Ok((commit, entries))
}

fn decode<T: serde::de::DeserializeOwned>(
    blocks: &HashMap<Cid, Vec<u8>>,
    cid: &Cid,
) -> Result<T, RepoError> {
    let block = blocks.get(cid).ok_or(RepoError::MissingBlock(*cid))?;
    serde_ipld_dagcbor::from_slice(block).map_err(|e| RepoError::InvalidBlock {
        cid: *cid,
        reason: e.to_string(),
    })
}

fn walk_node(
    blocks: &HashMap<Cid, Vec<u8>>,
    cid: &Cid,
    out: &mut Vec<RecordEntry>,
) -> Result<(), RepoError> {
    let node: MstNode = decode(blocks, cid)?;

    if let Some(left) = &node.l {
        walk_node(blocks, left, out)?;
    }

    // Keys are prefix-compressed against the previous key within the node.
    let mut prev_key: Vec<u8> = Vec::new();
    for entry in &node.e {
        let mut key = prev_key[..entry.p.min(prev_key.len())].to_vec();
        key.extend_from_slice(&entry.k);
        prev_key = key.clone();

        let key = String::from_utf8(key).map_err(|_| RepoError::InvalidKey)?;
        out.push(RecordEntry { key, cid: entry.v });

        if let Some(subtree) = &entry.t {
            walk_node(blocks, subtree, out)?;
        }
    }

    Ok(())
}
