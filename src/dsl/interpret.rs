// src/dsl/interpret.rs
//
// Walks the same block list `transpile::render` does and builds a
// `WorkflowGroup` directly, in-process, used by the `check` and `run`
// subcommands so they don't need a second compiler pass.
//
// One documented simplification (see `DESIGN.md`): `:=` payloads are meant
// to be interpolated as runtime expressions by the *emitted* Rust program
// (`format!(...)` over the literal, see `transpile::render`). Since
// `interpret::execute` has no second compilation step to evaluate arbitrary
// Rust expressions, `:=` and `=` are treated identically here -- the
// payload text is taken verbatim. Full `:=` fidelity is only available by
// compiling the output of `tiniflow transpile`.

use std::collections::HashMap;

use crate::dsl::{parse_blocks, split_edge_payload, split_payload, Block, SigilTable};
use crate::error::{Result, TiniflowError};
use crate::workflow::{EdgeSegment, NodeHandle, WorkflowGroup, WorkflowGuard, WorkflowKey};

pub fn execute(source: &str) -> Result<WorkflowGroup> {
    let (_, blocks) = parse_blocks(source)?;
    let group = WorkflowGroup::new();
    let mut nodes_by_name: HashMap<String, NodeHandle> = HashMap::new();
    let mut table = SigilTable::default();
    let mut pending_temp: Option<SigilTable> = None;
    // Holding the active workflow's guard keeps it current until a later
    // `>` line replaces it (dropping this one, restoring the group's
    // previous-active workflow first) -- workflow headers don't nest.
    let mut active: Option<WorkflowGuard> = None;

    for block in blocks {
        let effective = pending_temp.take().unwrap_or_else(|| table.clone());
        match block {
            Block::Workflow { expr, line } => {
                let key = parse_workflow_key(&expr, line)?;
                active = Some(group.enter(key)?);
            }
            Block::Node { name, payload, line, .. } => {
                let pieces = split_payload(&payload, &effective);
                let contents = pieces[0].clone();
                let metadata = pieces[1..].to_vec();
                let handle = group.add_node(contents, metadata);
                if let Some(n) = name {
                    nodes_by_name.insert(n, handle);
                } else {
                    nodes_by_name.insert(format!("__anon_{line}"), handle);
                }
            }
            Block::Edge { payload, line, .. } => {
                let split = split_edge_payload(&payload, &effective);
                let mut segments = Vec::new();
                for piece in &split.pieces {
                    if piece.len() == 1 && !nodes_by_name.contains_key(&piece[0]) {
                        segments.push(EdgeSegment::Meta(piece[0].clone()));
                        continue;
                    }
                    let mut chain = Vec::new();
                    for name in piece {
                        let handle = nodes_by_name.get(name).cloned().ok_or_else(|| TiniflowError::MalformedBlock {
                            line,
                            text: format!("reference to undeclared node `{name}`"),
                        })?;
                        chain.push(handle);
                    }
                    segments.push(EdgeSegment::Chain(chain));
                }
                group.add_edge(segments, &split.seps)?;
            }
            Block::TempRebind { field, value, line } => {
                pending_temp = Some(effective.rebind(&field, &value, line)?);
            }
            Block::PermRebind { field, value, line } => {
                table = effective.rebind(&field, &value, line)?;
            }
            Block::Passthrough { .. } => {
                // Arbitrary host-language code intermixed with the DSL has
                // no graph effect when interpreting directly; it only
                // matters to `transpile::render`'s textual output.
            }
        }
    }

    let _ = active;
    Ok(group)
}

fn parse_workflow_key(expr: &str, line: usize) -> Result<WorkflowKey> {
    if let Ok(i) = expr.trim().parse::<i64>() {
        Ok(WorkflowKey::Index(i))
    } else if expr.trim().is_empty() {
        Err(TiniflowError::MalformedBlock { line, text: "empty workflow header".to_string() })
    } else {
        Ok(WorkflowKey::Name(expr.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_pipeline_builds_one_workflow() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n* b = wc -l\n% _ = a | b\n";
        let group = execute(src).unwrap();
        assert_eq!(group.workflow_count(), 1);
    }

    #[test]
    fn named_workflow_header_creates_a_second_workflow() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n> nightly\n* b = echo bye\n";
        let group = execute(src).unwrap();
        assert_eq!(group.workflow_count(), 2);
    }

    #[test]
    fn reference_to_undeclared_node_is_rejected() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n% _ = a | ghost\n";
        assert!(execute(src).is_err());
    }

    #[test]
    fn fanout_edge_builds_without_error() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo x\n* b = cat\n* c = cat\n% _ = a | b || a | c\n";
        let group = execute(src).unwrap();
        assert_eq!(group.workflow_count(), 1);
    }

    #[test]
    fn control_edge_with_failure_tag_parses() {
        let src = "#!/usr/bin/env tiniflow\n* a = job\n* b = cleanup\n% _ = a - b || on.failure\n";
        let group = execute(src).unwrap();
        assert_eq!(group.workflow_count(), 1);
    }

    #[test]
    fn mixed_separator_edge_is_rejected() {
        let src = "#!/usr/bin/env tiniflow\n* a = x\n* b = y\n* c = z\n% _ = a | b - c\n";
        assert!(execute(src).is_err());
    }
}
