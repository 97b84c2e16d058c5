// src/workflow/mod.rs
//
// =============================================================================
// TINIFLOW: WORKFLOW MODEL
// =============================================================================
//
// The in-memory graph brain: Node, Edge, Workflow, WorkflowGroup.
//
// Responsibilities:
// 1. Hold an ordered list of nodes and edges per workflow.
// 2. Classify every edge as `data` or `control` from the separators observed
//    at transpile time.
// 3. At `run()`, apply the metadata-propagation rule (tf-success/failure/
//    always/start rewriting) and assemble the data graph + control graph
//    handed to the executor.
//
// Node/Edge identity is reference identity, not value equality: two nodes
// with identical contents and metadata are still distinct graph vertices.
// We use `Rc<RefCell<_>>` handles and key graphs by pointer address — see
// `node_key`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Result, TiniflowError};
use crate::executor;

pub mod tag;
pub use tag::{on, Tag};

// ============================================================================
// 1. NODE
// ============================================================================

#[derive(Debug)]
pub struct NodeInner {
    pub contents: String,
    pub metadata: Vec<String>,
}

pub type NodeHandle = Rc<RefCell<NodeInner>>;

pub fn new_node(contents: impl Into<String>, metadata: Vec<String>) -> NodeHandle {
    Rc::new(RefCell::new(NodeInner {
        contents: contents.into(),
        metadata,
    }))
}

/// Pointer identity of a node handle, used as a graph/map key so two
/// `NodeHandle`s pointing at the same node always hash and compare equal.
pub fn node_key(node: &NodeHandle) -> usize {
    Rc::as_ptr(node) as usize
}

// ============================================================================
// 2. EDGE
// ============================================================================

/// One payload piece of an edge declaration: either a chain of node
/// references (split on the raw separator) or a bare metadata token
/// (`on.failure`, ...) that didn't contain any separator.
#[derive(Debug, Clone)]
pub enum EdgeSegment {
    Chain(Vec<NodeHandle>),
    Meta(String),
    /// A nested edge, reachable only through direct API use (never emitted
    /// by the transpiler). `Edge::traverse` recurses into it without cycle
    /// detection — see DESIGN.md "cyclic references".
    Nested(EdgeHandle),
}

#[derive(Debug)]
pub struct EdgeInner {
    pub segments: Vec<EdgeSegment>,
    pub metadata: Vec<String>,
}

pub type EdgeHandle = Rc<RefCell<EdgeInner>>;

impl EdgeInner {
    /// Flattened list of every node mentioned by this edge, in declaration
    /// order, nested edges expanded in place. Used by the metadata
    /// propagation rule (`on.start`/`on.success`/`on.failure`/`on.always`),
    /// which only cares about "first node" vs "everything else".
    pub fn traverse(&self) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        for seg in &self.segments {
            match seg {
                EdgeSegment::Chain(nodes) => out.extend(nodes.iter().cloned()),
                EdgeSegment::Meta(_) => {}
                EdgeSegment::Nested(edge) => out.extend(edge.borrow().traverse()),
            }
        }
        out
    }

    /// Adjacent (u, v) pairs contributed to the graph. Each chain segment
    /// contributes its own internal pairs only — chains are independent
    /// traversals (e.g. a fan-out written as `a | b || a | c` is two
    /// chains, not one that bridges `b` to `a` across the boundary).
    pub fn pairs(&self) -> Vec<(NodeHandle, NodeHandle)> {
        let mut out = Vec::new();
        for seg in &self.segments {
            match seg {
                EdgeSegment::Chain(nodes) => {
                    for w in nodes.windows(2) {
                        out.push((w[0].clone(), w[1].clone()));
                    }
                }
                EdgeSegment::Meta(_) => {}
                EdgeSegment::Nested(edge) => out.extend(edge.borrow().pairs()),
            }
        }
        out
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.metadata.iter().any(|m| m == tag.as_str())
    }
}

// ============================================================================
// 3. WORKFLOW
// ============================================================================

#[derive(Default)]
pub struct Workflow {
    pub nodes: Vec<NodeHandle>,
    pub edges: Vec<EdgeHandle>,
}

impl Workflow {
    pub fn add_node(&mut self, contents: impl Into<String>, metadata: Vec<String>) -> NodeHandle {
        let node = new_node(contents, metadata);
        self.nodes.push(node.clone());
        node
    }

    /// `seps` holds, per payload piece, the separator characters observed in
    /// that piece (empty for a bare metadata token). Classification
    /// collects *all* observed separators into one set: exactly one of
    /// `|`/`-` must remain, otherwise the edge is rejected.
    pub fn add_edge(&mut self, segments: Vec<EdgeSegment>, seps: &[Vec<char>]) -> Result<EdgeHandle> {
        let observed: HashSet<char> = seps.iter().flatten().copied().collect();
        if observed.len() != 1 {
            return Err(TiniflowError::MixedSeparators {
                observed: observed.into_iter().collect(),
            });
        }
        let classification = if observed.contains(&'-') { Tag::Control } else { Tag::Data };

        let mut metadata = Vec::new();
        for seg in &segments {
            if let EdgeSegment::Meta(raw) = seg {
                metadata.push(tag::normalize_token(raw));
            }
        }
        metadata.push(classification.as_str().to_string());

        let edge = Rc::new(RefCell::new(EdgeInner { segments, metadata }));
        self.edges.push(edge.clone());
        Ok(edge)
    }

    /// Applies the metadata-propagation rule, rewrites node contents, and
    /// builds the data graph + control graph, then hands them to the
    /// executor.
    pub fn run(&self, filename: &str) -> Result<()> {
        self.propagate_metadata();
        self.finalize_contents();

        let mut data_graph: DiGraph<NodeHandle, ()> = DiGraph::new();
        let mut control_graph: DiGraph<NodeHandle, ()> = DiGraph::new();
        let mut data_idx: HashMap<usize, NodeIndex> = HashMap::new();
        let mut ctrl_idx: HashMap<usize, NodeIndex> = HashMap::new();

        for edge in &self.edges {
            let eb = edge.borrow();
            if eb.has_tag(Tag::Data) {
                for (u, v) in eb.pairs() {
                    let ui = *data_idx
                        .entry(node_key(&u))
                        .or_insert_with(|| data_graph.add_node(u.clone()));
                    let vi = *data_idx
                        .entry(node_key(&v))
                        .or_insert_with(|| data_graph.add_node(v.clone()));
                    data_graph.add_edge(ui, vi, ());
                }
            } else if eb.has_tag(Tag::Control) {
                for (u, v) in eb.pairs() {
                    let ui = *ctrl_idx
                        .entry(node_key(&u))
                        .or_insert_with(|| control_graph.add_node(u.clone()));
                    let vi = *ctrl_idx
                        .entry(node_key(&v))
                        .or_insert_with(|| control_graph.add_node(v.clone()));
                    control_graph.add_edge(ui, vi, ());
                }
            }
        }

        for node in &self.nodes {
            data_idx
                .entry(node_key(node))
                .or_insert_with(|| data_graph.add_node(node.clone()));
            ctrl_idx
                .entry(node_key(node))
                .or_insert_with(|| control_graph.add_node(node.clone()));
        }

        log::info!(
            "workflow {:?}: {} nodes, {} data edges, {} control edges",
            filename,
            self.nodes.len(),
            data_graph.edge_count(),
            control_graph.edge_count(),
        );

        executor::run(&data_graph, &[control_graph], filename)
    }

    fn propagate_metadata(&self) {
        // Rule 1: success/failure/always replace every non-first node's
        // metadata wholesale. Destructive and order-sensitive by design —
        // the last success/failure/always edge touching a node wins.
        // Rule 2: start prepends tf-start to whatever rule 1 left behind.
        // Applied in this order, per edge (see DESIGN.md for why rule 1
        // runs before rule 2 when both tags land on the same edge).
        for edge in &self.edges {
            let eb = edge.borrow();
            let synthetic = if eb.has_tag(Tag::Success) {
                Some("tf-success")
            } else if eb.has_tag(Tag::Failure) {
                Some("tf-failure")
            } else if eb.has_tag(Tag::Always) {
                Some("tf-always")
            } else {
                None
            };
            if let Some(tag) = synthetic {
                for (i, node) in eb.traverse().into_iter().enumerate() {
                    if i == 0 {
                        continue;
                    }
                    node.borrow_mut().metadata = vec![tag.to_string()];
                }
            }
            if eb.has_tag(Tag::Start) {
                if let Some(first) = eb.traverse().into_iter().next() {
                    let mut nb = first.borrow_mut();
                    let mut rewritten = vec!["tf-start".to_string()];
                    rewritten.extend(nb.metadata.iter().cloned());
                    nb.metadata = rewritten;
                }
            }
        }
    }

    fn finalize_contents(&self) {
        for node in &self.nodes {
            let mut nb = node.borrow_mut();
            if nb.metadata.is_empty() {
                continue;
            }
            let joined = nb.metadata.join(" ");
            let escaped = nb.contents.replace('\\', "\\\\").replace('\'', "\\'");
            nb.contents = format!("{joined} '{escaped}'");
        }
    }
}

// ============================================================================
// 4. WORKFLOW GROUP
// ============================================================================

pub enum WorkflowKey {
    Name(String),
    Index(i64),
}

struct GroupInner {
    workflows: Vec<(Option<String>, Rc<RefCell<Workflow>>)>,
    current: usize,
}

/// A mapping from workflow name (or the pre-created anonymous workflow) to
/// `Workflow`, with a currently-active workflow used as the implicit target
/// for node/edge additions. `enter`/`WorkflowGuard` model entering and
/// leaving a named workflow scope.
///
/// The mutable state lives behind `Rc<RefCell<_>>` rather than being owned
/// directly, so a live `WorkflowGuard` (which needs to reach back into this
/// state on `Drop`) never has to hold an exclusive `&mut WorkflowGroup` —
/// callers can keep using the same `WorkflowGroup` value while a guard
/// from it is still in scope.
pub struct WorkflowGroup {
    inner: Rc<RefCell<GroupInner>>,
}

impl Default for WorkflowGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowGroup {
    pub fn new() -> Self {
        let group = Self {
            inner: Rc::new(RefCell::new(GroupInner {
                workflows: Vec::new(),
                current: 0,
            })),
        };
        group.new_workflow(None);
        group
    }

    fn new_workflow(&self, name: Option<String>) -> Rc<RefCell<Workflow>> {
        let wf = Rc::new(RefCell::new(Workflow::default()));
        let mut inner = self.inner.borrow_mut();
        inner.workflows.push((name, wf.clone()));
        inner.current = inner.workflows.len() - 1;
        wf
    }

    fn current_workflow(&self) -> Rc<RefCell<Workflow>> {
        let inner = self.inner.borrow();
        inner.workflows[inner.current].1.clone()
    }

    pub fn add_node(&self, contents: impl Into<String>, metadata: Vec<String>) -> NodeHandle {
        self.current_workflow().borrow_mut().add_node(contents, metadata)
    }

    pub fn add_edge(&self, segments: Vec<EdgeSegment>, seps: &[Vec<char>]) -> Result<EdgeHandle> {
        self.current_workflow().borrow_mut().add_edge(segments, seps)
    }

    /// Enters a workflow context. Entering by name lazily creates a new
    /// workflow if it doesn't exist; entering by index requires existence
    /// (negative indices count from the end, slice-index style).
    pub fn enter(&self, key: WorkflowKey) -> Result<WorkflowGuard> {
        let mut inner = self.inner.borrow_mut();
        let previous = inner.current;
        let idx = match key {
            WorkflowKey::Index(i) => {
                let len = inner.workflows.len() as i64;
                let resolved = if i < 0 { len + i } else { i };
                if resolved < 0 || resolved >= len {
                    return Err(TiniflowError::UnknownWorkflowIndex {
                        index: i,
                        len: inner.workflows.len(),
                    });
                }
                resolved as usize
            }
            WorkflowKey::Name(name) => {
                match inner.workflows.iter().position(|(n, _)| n.as_deref() == Some(name.as_str())) {
                    Some(pos) => pos,
                    None => {
                        drop(inner);
                        self.new_workflow(Some(name));
                        let inner = self.inner.borrow();
                        inner.workflows.len() - 1
                    }
                }
            }
        };
        self.inner.borrow_mut().current = idx;
        Ok(WorkflowGuard {
            inner: self.inner.clone(),
            previous,
        })
    }

    pub fn run(&self, filename: &str) -> Result<()> {
        let workflows: Vec<Rc<RefCell<Workflow>>> = self.inner.borrow().workflows.iter().map(|(_, wf)| wf.clone()).collect();
        for wf in workflows {
            wf.borrow().run(filename)?;
        }
        Ok(())
    }

    pub fn workflow_count(&self) -> usize {
        self.inner.borrow().workflows.len()
    }

    /// Name of the currently-active workflow, `None` for the anonymous
    /// default. Exposed for diagnostics/tests; not used by graph assembly.
    pub fn current_name(&self) -> Option<String> {
        let inner = self.inner.borrow();
        inner.workflows[inner.current].0.clone()
    }
}

/// RAII guard restoring the previously-active workflow on drop.
pub struct WorkflowGuard {
    inner: Rc<RefCell<GroupInner>>,
    previous: usize,
}

impl Drop for WorkflowGuard {
    fn drop(&mut self) {
        self.inner.borrow_mut().current = self.previous;
    }
}
