// src/stream.rs
//! One media stream: its candidates, its checklist, and the nominated pair
//! per component

use std::collections::BTreeMap;

use crate::check_list::{CheckList, PairRef};
use crate::store::CandidateStore;

/// Remote short-term credentials for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub ufrag: String,
    pub password: String,
}

/// ICE stream
#[derive(Debug)]
pub struct Stream {
    /// Stream ID
    pub id: u32,

    /// Local and remote candidates
    pub store: CandidateStore,

    /// Connectivity checklist
    pub check_list: CheckList,

    /// Credentials the peer signaled for this stream
    pub remote_credentials: Option<RemoteCredentials>,

    /// Nominated pair per component, set once nomination concludes
    pub nominated: BTreeMap<u32, PairRef>,
}

impl Stream {
    /// Create a new stream
    pub fn new(id: u32) -> Self {
        Self {
            id,
            store: CandidateStore::new(),
            check_list: CheckList::new(id),
            remote_credentials: None,
            nominated: BTreeMap::new(),
        }
    }

    /// Nominated pair for a component, if nomination has concluded
    pub fn nominated_pair(&self, component_id: u32) -> Option<PairRef> {
        self.nominated.get(&component_id).copied()
    }
}
