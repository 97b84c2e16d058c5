// src/executor/mod.rs
//
// =============================================================================
// TINIFLOW: EXECUTOR
// =============================================================================
//
// Turns a primary data graph and zero or more auxiliary control graphs
// into real OS processes wired together with pipes:
//
// 1. Expand each input graph: every node becomes a Command process; a node
//    with out-degree > 1 gets a Tee process spliced in between it and its
//    successors.
// 2. Allocate one pipe PER SINK (not per edge) in each expanded graph --
//    pipe coalescing: every predecessor of a fan-in sink shares that
//    sink's single pipe, registering its write end as their own output and
//    the read end as the sink's input.
// 3. Union every expanded graph's nodes by identity (a Command node keeps
//    the same process whether it's wired by the data graph, a control
//    graph, or both; Tee nodes are always graph-local and never shared)
//    and fork exactly one child per distinct node in the union.
// 4. Wire each child's registered fds per the environment contract
//    (`TF_DATA_IN/OUT`, `TF_CTRL_IN/OUT`), exec the shell or `tee`, and
//    reap every child before returning.

pub mod unixio;

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::io::RawFd;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{Result, TiniflowError};
use crate::workflow::{node_key, NodeHandle};

// ============================================================================
// 1. PIPES
// ============================================================================

struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Pipe {
    fn create() -> Result<Self> {
        let (read_fd, write_fd) = nix::unistd::pipe().map_err(TiniflowError::from)?;
        use std::os::fd::IntoRawFd;
        Ok(Self { read_fd: read_fd.into_raw_fd(), write_fd: write_fd.into_raw_fd() })
    }
}

// ============================================================================
// 2. EXPANDED GRAPH
// ============================================================================

enum ExpandedNode {
    Command(NodeHandle),
    Tee,
}

fn expand(input: &DiGraph<NodeHandle, ()>) -> DiGraph<ExpandedNode, ()> {
    let mut x: DiGraph<ExpandedNode, ()> = DiGraph::new();
    let mut command_of: HashMap<NodeIndex, NodeIndex> = HashMap::new();

    for idx in input.node_indices() {
        let xi = x.add_node(ExpandedNode::Command(input[idx].clone()));
        command_of.insert(idx, xi);
    }

    for idx in input.node_indices() {
        let mut successors: Vec<NodeIndex> = input.neighbors_directed(idx, Direction::Outgoing).collect();
        successors.sort_by_key(|n| n.index());
        let src = command_of[&idx];
        match successors.len() {
            0 => {}
            1 => {
                x.add_edge(src, command_of[&successors[0]], ());
            }
            _ => {
                let tee = x.add_node(ExpandedNode::Tee);
                x.add_edge(src, tee, ());
                for succ in successors {
                    x.add_edge(tee, command_of[&succ], ());
                }
            }
        }
    }

    x
}

// ============================================================================
// 3. UNIONED PROCESS TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Data,
    Control,
}

impl Channel {
    fn env_prefix(self) -> &'static str {
        match self {
            Channel::Data => "TF_DATA",
            Channel::Control => "TF_CTRL",
        }
    }
}

struct ChannelFd {
    fd: RawFd,
    channel: Channel,
}

enum ProcKind {
    Command(NodeHandle),
    Tee,
}

struct ProcEntry {
    kind: ProcKind,
    inputs: Vec<ChannelFd>,
    outputs: Vec<ChannelFd>,
}

impl ProcEntry {
    fn new(kind: ProcKind) -> Self {
        Self { kind, inputs: Vec::new(), outputs: Vec::new() }
    }
}

/// Identifies one unioned process. `Command` nodes are keyed by the
/// underlying node's pointer identity so the same logical command shares
/// one process whether it's reached via the data graph, a control graph,
/// or both. `Tee` nodes are always local to the expanded graph that
/// produced them (`graph_id` + that graph's own node index).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ProcKey {
    Command(usize),
    Tee(usize, usize),
}

fn key_of(graph_id: usize, x: &DiGraph<ExpandedNode, ()>, xi: NodeIndex) -> ProcKey {
    match &x[xi] {
        ExpandedNode::Command(h) => ProcKey::Command(node_key(h)),
        ExpandedNode::Tee => ProcKey::Tee(graph_id, xi.index()),
    }
}

/// Registers one expanded graph's pipes into the shared process table,
/// applying the coalescing rule: a pipe is allocated per sink (only when
/// it has at least one predecessor), its write end registered as an
/// output on every predecessor, its read end as the sink's sole input.
fn register_graph(
    graph_id: usize,
    x: &DiGraph<ExpandedNode, ()>,
    channel: Channel,
    procs: &mut HashMap<ProcKey, ProcEntry>,
    all_fds: &mut Vec<RawFd>,
) -> Result<()> {
    for xi in x.node_indices() {
        let key = key_of(graph_id, x, xi);
        procs.entry(key).or_insert_with(|| {
            let kind = match &x[xi] {
                ExpandedNode::Command(h) => ProcKind::Command(h.clone()),
                ExpandedNode::Tee => ProcKind::Tee,
            };
            ProcEntry::new(kind)
        });
    }

    for xi in x.node_indices() {
        let mut preds: Vec<NodeIndex> = x.neighbors_directed(xi, Direction::Incoming).collect();
        preds.sort_by_key(|n| n.index());
        if preds.is_empty() {
            continue;
        }
        let pipe = Pipe::create()?;
        all_fds.push(pipe.read_fd);
        all_fds.push(pipe.write_fd);

        let sink_key = key_of(graph_id, x, xi);
        procs.get_mut(&sink_key).expect("inserted above").inputs.push(ChannelFd { fd: pipe.read_fd, channel });

        for pred in preds {
            let src_key = key_of(graph_id, x, pred);
            procs.get_mut(&src_key).expect("inserted above").outputs.push(ChannelFd { fd: pipe.write_fd, channel });
        }
    }

    Ok(())
}

// ============================================================================
// 4. RUN
// ============================================================================

/// Runs `data_graph` together with every `control_graphs` entry: expands
/// each, unions their nodes into one process table, forks everything, then
/// reaps until every child has exited. Child-level failure (non-zero exit,
/// exec failure) is never fatal here -- this function only reports that it
/// ran every process to completion, not that every process succeeded.
pub fn run(data_graph: &DiGraph<NodeHandle, ()>, control_graphs: &[DiGraph<NodeHandle, ()>], filename: &str) -> Result<()> {
    log::info!(
        "{}: {} data node(s), {} control graph(s)",
        filename,
        data_graph.node_count(),
        control_graphs.len()
    );

    let mut procs: HashMap<ProcKey, ProcEntry> = HashMap::new();
    let mut all_fds: Vec<RawFd> = Vec::new();

    let data_x = expand(data_graph);
    register_graph(0, &data_x, Channel::Data, &mut procs, &mut all_fds)?;
    for (i, control_graph) in control_graphs.iter().enumerate() {
        let ctrl_x = expand(control_graph);
        register_graph(i + 1, &ctrl_x, Channel::Control, &mut procs, &mut all_fds)?;
    }

    if procs.is_empty() {
        return Ok(());
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let devnull_read = unixio::open_devnull_read()?;
    let devnull_write = unixio::open_devnull_write()?;
    all_fds.push(devnull_read);
    all_fds.push(devnull_write);

    let mut children: HashMap<Pid, ProcKey> = HashMap::new();
    for (key, proc) in &procs {
        let pid = spawn(proc, &shell, &all_fds, devnull_read, devnull_write)?;
        children.insert(pid, *key);
    }

    // Every pipe fd has been inherited and dup'd by whichever child needs
    // it; the parent's own copies are the only thing standing between a
    // reader and EOF once its last writer child exits, so they're dropped
    // here rather than held until `run` returns.
    for fd in all_fds {
        unixio::close_fd(fd);
    }

    reap_until_empty(children)?;
    Ok(())
}

fn spawn(proc: &ProcEntry, shell: &str, all_fds: &[RawFd], devnull_read: RawFd, devnull_write: RawFd) -> Result<Pid> {
    match unsafe { fork() }.map_err(TiniflowError::from)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => match &proc.kind {
            ProcKind::Command(handle) => {
                let command = handle.borrow().contents.clone();
                spawn_command(&command, proc, shell, all_fds, devnull_read, devnull_write)
            }
            ProcKind::Tee => spawn_tee(proc, shell, all_fds, devnull_read, devnull_write),
        },
    }
}

/// A Command child: wires data-channel fds onto stdin/stdout (dup2),
/// exposes every registered fd's number via `<channel>_IN`/`<channel>_OUT`
/// env vars, falls back to the process's own stdin/stdout for an unwired
/// data channel and a pre-opened `/dev/null` for an unwired control
/// channel, closes every other known fd, then execs `<shell> -c <command>`.
/// Never returns.
fn spawn_command(command: &str, proc: &ProcEntry, shell: &str, all_fds: &[RawFd], devnull_read: RawFd, devnull_write: RawFd) -> ! {
    let mut env_overrides: HashMap<String, String> = HashMap::new();
    env_overrides.insert("TF_DATA_IN".to_string(), "0".to_string());
    env_overrides.insert("TF_DATA_OUT".to_string(), "1".to_string());
    env_overrides.insert("TF_CTRL_IN".to_string(), devnull_read.to_string());
    env_overrides.insert("TF_CTRL_OUT".to_string(), devnull_write.to_string());

    let mut keep: Vec<RawFd> = vec![0, 1, 2, devnull_read, devnull_write];

    for input in &proc.inputs {
        env_overrides.insert(format!("{}_IN", input.channel.env_prefix()), input.fd.to_string());
        keep.push(input.fd);
        if input.channel == Channel::Data {
            unixio::dup2(input.fd, 0).expect("dup2 stdin");
        }
    }
    for output in &proc.outputs {
        env_overrides.insert(format!("{}_OUT", output.channel.env_prefix()), output.fd.to_string());
        keep.push(output.fd);
        if output.channel == Channel::Data {
            unixio::dup2(output.fd, 1).expect("dup2 stdout");
        }
    }

    close_unkept(all_fds, &keep);

    let env = build_env(&env_overrides);
    let argv = [
        CString::new(shell).expect("shell path has no interior NUL"),
        CString::new("-c").unwrap(),
        CString::new(command).expect("command text has no interior NUL"),
    ];
    exec_or_abort(shell, &argv, &env)
}

/// A Tee child: its sole input (from whichever node it's fanning out) is
/// dup'd onto stdin regardless of channel, the same way a shell pipeline's
/// `tee` always reads stdin; its outputs are addressed by raw fd number
/// through `/proc/self/fd/<n>`, wrapped in a shell so the trailing
/// `>/dev/null` redirection (discarding `tee`'s own stdout copy) is
/// interpreted. Never returns.
fn spawn_tee(proc: &ProcEntry, shell: &str, all_fds: &[RawFd], devnull_read: RawFd, devnull_write: RawFd) -> ! {
    let mut keep: Vec<RawFd> = vec![0, 1, 2, devnull_read, devnull_write];

    if let Some(input) = proc.inputs.first() {
        keep.push(input.fd);
        unixio::dup2(input.fd, 0).expect("dup2 stdin for tee");
    }
    let targets: Vec<RawFd> = proc.outputs.iter().map(|o| o.fd).collect();
    keep.extend(&targets);

    close_unkept(all_fds, &keep);

    let paths: Vec<String> = targets.iter().map(|fd| format!("/proc/self/fd/{fd}")).collect();
    let script = format!("tee {} >/dev/null", paths.join(" "));
    let env = build_env(&HashMap::new());
    let argv = [
        CString::new(shell).expect("shell path has no interior NUL"),
        CString::new("-c").unwrap(),
        CString::new(script).expect("tee script has no interior NUL"),
    ];
    exec_or_abort(shell, &argv, &env)
}

fn close_unkept(all_fds: &[RawFd], keep: &[RawFd]) {
    for &fd in all_fds {
        if !keep.contains(&fd) {
            unixio::close_fd(fd);
        }
    }
}

fn build_env(overrides: &HashMap<String, String>) -> Vec<CString> {
    let mut vars: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in overrides {
        vars.insert(k.clone(), v.clone());
    }
    vars.into_iter()
        .map(|(k, v)| CString::new(format!("{k}={v}")).expect("env entries have no interior NUL"))
        .collect()
}

fn exec_or_abort(program: &str, argv: &[CString], env: &[CString]) -> ! {
    let program_c = CString::new(program).expect("program path has no interior NUL");
    let err = nix::unistd::execvpe(&program_c, argv, env).expect_err("execvpe only returns on failure");
    eprintln!("tiniflow: exec {program} failed: {err}");
    std::process::exit(127);
}

// ============================================================================
// 5. SUPERVISION
// ============================================================================

/// Reaps children until the tracking map is empty. A pid `waitpid` returns
/// that isn't in the map (an orphaned grandchild reparented to us) is
/// silently ignored.
fn reap_until_empty(mut children: HashMap<Pid, ProcKey>) -> Result<()> {
    while !children.is_empty() {
        let status = match waitpid(Pid::from_raw(-1), None) {
            Ok(status) => status,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => return Err(TiniflowError::from(e)),
        };
        match status {
            WaitStatus::Exited(pid, code) => {
                if code != 0 {
                    log::warn!("child {pid} exited with status {code}");
                }
                children.remove(&pid);
            }
            WaitStatus::Signaled(pid, sig, _) => {
                log::warn!("child {pid} killed by signal {sig:?}");
                children.remove(&pid);
            }
            _ => {}
        }
    }
    Ok(())
}
