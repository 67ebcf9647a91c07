//! Thread-safe call graph aggregation
//!
//! The model is the single piece of mutable shared state. One Mutex guards
//! nodes, edges, filter configuration, connection state and the pending
//! process selection, so a snapshot never observes a half-applied append.
//! Exactly one writer (the sampler) feeds the append path; request handlers
//! read and issue reset/filter commands.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::error::AgentError;
use crate::frame::{FrameFilter, MethodIdentity};

/// Outgoing edge state, keyed by callee identity on the owning node
#[derive(Debug, Clone)]
struct EdgeState {
    counter: u64,
    is_new: bool,
}

/// Per-method node state
#[derive(Debug, Clone)]
struct NodeState {
    counter: u64,
    is_new: bool,
    edges: HashMap<MethodIdentity, EdgeState>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            counter: 0,
            is_new: true,
            edges: HashMap::new(),
        }
    }
}

/// Include/exclude patterns; any change forces a full graph reset
#[derive(Debug, Default)]
struct FilterConfig {
    white_pattern: String,
    black_pattern: String,
    white: Option<Regex>,
    black: Option<Regex>,
}

/// Attachment lifecycle state, written only by the sampler
#[derive(Debug, Default)]
struct ConnectionState {
    active_pid: Option<i32>,
    connected: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<MethodIdentity, NodeState>,
    filter: FilterConfig,
    connection: ConnectionState,
    /// Selection requested over the wire, applied by the sampler loop
    pending_pid: Option<i32>,
    /// Last discovery result, shared between server handler and sampler
    discovered: Vec<i32>,
}

/// Serialized node; attribute names are the wire contract
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    #[serde(rename = "packageName")]
    pub package_name: String,
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "methodName")]
    pub method_name: String,
    pub counter: u64,
    #[serde(rename = "newItem")]
    pub new_item: bool,
}

/// Serialized caller→callee edge; ids index the snapshot's node array
#[derive(Debug, Clone, Serialize)]
pub struct LinkView {
    #[serde(rename = "callerId")]
    pub caller_id: usize,
    #[serde(rename = "calleeId")]
    pub callee_id: usize,
    pub counter: u64,
    #[serde(rename = "newItem")]
    pub new_item: bool,
}

/// Immutable view of the whole graph at one instant
#[derive(Debug, Clone, Serialize, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeView>,
    pub links: Vec<LinkView>,
}

/// Serialized discovery result plus attachment state
#[derive(Debug, Clone, Serialize)]
pub struct ProcessListView {
    #[serde(rename = "processIds")]
    pub process_ids: Vec<i32>,
    #[serde(rename = "activeProcessId")]
    pub active_process_id: Option<i32>,
    pub connected: bool,
}

/// The shared call graph model
#[derive(Debug, Default)]
pub struct CallGraphModel {
    inner: Mutex<Inner>,
}

impl CallGraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all nodes and edges; filter and connection state survive
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.clear();
    }

    /// Replace the whitelist pattern; an invalid pattern keeps the previous one.
    /// Callers follow a successful change with `reset()`.
    pub fn set_white_list(&self, pattern: &str) -> Result<(), AgentError> {
        let compiled = compile_pattern(pattern)?;
        let mut inner = self.inner.lock().unwrap();
        info!("set whitelist pattern='{}'", pattern);
        inner.filter.white_pattern = pattern.to_string();
        inner.filter.white = compiled;
        Ok(())
    }

    /// Replace the blacklist pattern; an invalid pattern keeps the previous one.
    pub fn set_black_list(&self, pattern: &str) -> Result<(), AgentError> {
        let compiled = compile_pattern(pattern)?;
        let mut inner = self.inner.lock().unwrap();
        info!("set blacklist pattern='{}'", pattern);
        inner.filter.black_pattern = pattern.to_string();
        inner.filter.black = compiled;
        Ok(())
    }

    /// Current compiled filters, cheap to clone per sampling iteration
    pub fn frame_filter(&self) -> FrameFilter {
        let inner = self.inner.lock().unwrap();
        FrameFilter::new(inner.filter.white.clone(), inner.filter.black.clone())
    }

    /// Append one sample's frame sequence, innermost frame first.
    ///
    /// Each consecutive pair (caller, callee) gets both nodes and their
    /// connecting edge created on demand; the edge weight grows by one and
    /// newly created nodes/edges carry the freshness flag until the next
    /// snapshot consumes it.
    pub fn append(&self, frames: &[MethodIdentity]) {
        if frames.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for frame in frames {
            let node = inner
                .nodes
                .entry(frame.clone())
                .or_insert_with(NodeState::new);
            node.counter += 1;
        }
        for pair in frames.windows(2) {
            let node = inner
                .nodes
                .entry(pair[0].clone())
                .or_insert_with(NodeState::new);
            let edge = node.edges.entry(pair[1].clone()).or_insert(EdgeState {
                counter: 0,
                is_new: true,
            });
            edge.counter += 1;
        }
    }

    /// Produce a serializable view of the graph and consume freshness flags.
    ///
    /// Clearing happens inside the same critical section, so exactly one
    /// reader observes a given creation with `newItem=true`.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut inner = self.inner.lock().unwrap();

        let mut identities: Vec<MethodIdentity> = inner.nodes.keys().cloned().collect();
        identities.sort();
        let index: HashMap<&MethodIdentity, usize> = identities
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut nodes = Vec::with_capacity(identities.len());
        let mut links = Vec::new();
        for identity in &identities {
            let state = &inner.nodes[identity];
            nodes.push(NodeView {
                package_name: identity.namespace.clone(),
                class_name: identity.type_name.clone(),
                method_name: identity.method.clone(),
                counter: state.counter,
                new_item: state.is_new,
            });
            let caller_id = index[identity];
            for (callee, edge) in &state.edges {
                links.push(LinkView {
                    caller_id,
                    callee_id: index[callee],
                    counter: edge.counter,
                    new_item: edge.is_new,
                });
            }
        }
        links.sort_by_key(|l| (l.caller_id, l.callee_id));

        // Freshness is a one-shot signal for the next polling cycle
        for state in inner.nodes.values_mut() {
            state.is_new = false;
            for edge in state.edges.values_mut() {
                edge.is_new = false;
            }
        }

        GraphSnapshot { nodes, links }
    }

    /// Record a discovery result
    pub fn set_discovered(&self, pids: Vec<i32>) {
        self.inner.lock().unwrap().discovered = pids;
    }

    pub fn discovered(&self) -> Vec<i32> {
        self.inner.lock().unwrap().discovered.clone()
    }

    /// Request a selection change; applied inside the sampler's loop
    pub fn request_process(&self, pid: i32) {
        info!("set new process id={}", pid);
        self.inner.lock().unwrap().pending_pid = Some(pid);
    }

    pub fn pending_process(&self) -> Option<i32> {
        self.inner.lock().unwrap().pending_pid
    }

    /// Sampler-only: drop a selection that could not be attached, so the
    /// next iteration falls back to full rediscovery
    pub fn clear_pending_process(&self) {
        self.inner.lock().unwrap().pending_pid = None;
    }

    /// Sampler-only: record the established attachment
    pub fn set_active_process(&self, pid: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.connection.active_pid = Some(pid);
    }

    /// Sampler-only: flip the connected flag
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connection.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connection.connected
    }

    pub fn active_process(&self) -> Option<i32> {
        self.inner.lock().unwrap().connection.active_pid
    }

    /// Discovery result plus attachment state for the wire
    pub fn process_list(&self) -> ProcessListView {
        let inner = self.inner.lock().unwrap();
        ProcessListView {
            process_ids: inner.discovered.clone(),
            active_process_id: inner.connection.active_pid,
            connected: inner.connection.connected,
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Option<Regex>, AgentError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    match Regex::new(pattern) {
        Ok(re) => Ok(Some(re)),
        Err(source) => Err(AgentError::Filter {
            pattern: pattern.to_string(),
            source,
        }),
    }
}
