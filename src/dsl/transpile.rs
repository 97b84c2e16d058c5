// src/dsl/transpile.rs
//
// Emits literal Rust source text: a `fn main()` that rebuilds the exact
// same workflow graph through the public `tiniflow` library API and runs
// it. This is what `tiniflow transpile input.tf` writes to stdout.
// Prologue (imports/setup) and epilogue (the final `group.run(...)` call)
// can each be independently suppressed.

use std::fmt::Write as _;

use crate::dsl::{parse_blocks, split_edge_payload, Block, SigilTable};
use crate::error::Result;

pub struct RenderOptions {
    pub disable_prologue: bool,
    pub disable_epilogue: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { disable_prologue: false, disable_epilogue: false }
    }
}

/// Translates `source` into a Rust program: prologue import/setup line(s),
/// the shebang preserved verbatim, one translated line per DSL block (or
/// the original line, for passthrough), and an epilogue that invokes the
/// workflow runner on `filename`.
pub fn render(source: &str, filename: &str, opts: &RenderOptions) -> Result<String> {
    let (shebang, blocks) = parse_blocks(source)?;
    let mut out = String::new();

    if !opts.disable_prologue {
        writeln!(out, "// Generated by `tiniflow transpile` from {filename:?}. Do not edit by hand.").ok();
        writeln!(out, "use tiniflow::workflow::{{EdgeSegment, WorkflowGroup, WorkflowKey}};").ok();
        writeln!(out).ok();
    }

    writeln!(out, "{shebang}").ok();
    writeln!(out, "fn main() -> anyhow::Result<()> {{").ok();
    writeln!(out, "    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(\"info\")).init();").ok();
    writeln!(out, "    let mut group = WorkflowGroup::new();").ok();
    writeln!(out, "    let mut __wf_guard: Option<_> = None;").ok();

    let mut node_var = std::collections::HashMap::new();
    let mut counter = 0usize;
    let mut table = SigilTable::default();
    let mut pending_temp: Option<SigilTable> = None;

    for block in &blocks {
        let effective = pending_temp.take().unwrap_or_else(|| table.clone());
        match block {
            Block::Workflow { expr, .. } => {
                let key = if let Ok(i) = expr.parse::<i64>() {
                    format!("WorkflowKey::Index({i})")
                } else {
                    format!("WorkflowKey::Name({expr:?}.to_string())")
                };
                writeln!(out, "    __wf_guard = Some(group.enter({key})?);").ok();
            }
            Block::Node { name, payload, interpolate, .. } => {
                counter += 1;
                let var = name.clone().unwrap_or_else(|| format!("__n{counter}"));
                let pieces = crate::dsl::split_payload(payload, &effective);
                let contents_expr = render_payload(&pieces[0], *interpolate);
                let meta: Vec<String> = pieces[1..].iter().map(|m| format!("{m:?}.to_string()")).collect();
                writeln!(
                    out,
                    "    let {var} = group.add_node({contents_expr}, vec![{}]);",
                    meta.join(", ")
                )
                .ok();
                node_var.insert(var.clone(), var.clone());
                if let Some(n) = name {
                    node_var.insert(n.clone(), var);
                }
            }
            Block::Edge { payload, .. } => {
                let split = split_edge_payload(payload, &effective);
                writeln!(out, "    group.add_edge(vec![").ok();
                for piece in &split.pieces {
                    if piece.len() == 1 && !node_var.contains_key(&piece[0]) {
                        writeln!(out, "        EdgeSegment::Meta({:?}.to_string()),", piece[0]).ok();
                        continue;
                    }
                    let vars: Vec<String> = piece
                        .iter()
                        .map(|n| node_var.get(n).cloned().unwrap_or_else(|| format!("/* unknown node {n} */")))
                        .collect();
                    writeln!(out, "        EdgeSegment::Chain(vec![{}]),", vars.join(", ")).ok();
                }
                writeln!(out, "    ], &[").ok();
                for seps in &split.seps {
                    let chars: Vec<String> = seps.iter().map(|c| format!("{c:?}")).collect();
                    writeln!(out, "        vec![{}],", chars.join(", ")).ok();
                }
                writeln!(out, "    ])?;").ok();
            }
            Block::TempRebind { field, value, line } => {
                pending_temp = Some(effective.rebind(field, value, *line)?);
                writeln!(out, "    // $ {field} = {value} (tokenizer rebind, no runtime effect)").ok();
            }
            Block::PermRebind { field, value, line } => {
                table = effective.rebind(field, value, *line)?;
                writeln!(out, "    // $$ {field} = {value} (tokenizer rebind, no runtime effect)").ok();
            }
            Block::Passthrough { text, .. } => {
                writeln!(out, "{text}").ok();
            }
        }
    }

    if !opts.disable_epilogue {
        writeln!(out, "    group.run({filename:?})?;").ok();
    }
    writeln!(out, "    Ok(())").ok();
    writeln!(out, "}}").ok();

    Ok(out)
}

fn render_payload(contents: &str, interpolate: bool) -> String {
    if interpolate {
        format!("format!({:?})", contents)
    } else {
        format!("{contents:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_default(source: &str, filename: &str) -> String {
        render(source, filename, &RenderOptions::default()).unwrap()
    }

    #[test]
    fn renders_compilable_looking_main() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n* b = wc -l\n% _ = a | b\n";
        let rendered = render_default(src, "pipeline.tf");
        assert!(rendered.contains("fn main() -> anyhow::Result<()>"));
        assert!(rendered.contains("group.add_node(\"echo hi\""));
        assert!(rendered.contains("EdgeSegment::Chain"));
        assert!(rendered.contains("group.run(\"pipeline.tf\")"));
    }

    #[test]
    fn metadata_only_edge_emits_meta_segment() {
        let src = "#!/usr/bin/env tiniflow\n* a = job\n* b = cleanup\n% _ = a - b || on.failure\n";
        let rendered = render_default(src, "x.tf");
        assert!(rendered.contains("EdgeSegment::Meta"));
    }

    #[test]
    fn shebang_is_preserved_as_first_line_after_prologue() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n";
        let rendered = render_default(src, "x.tf");
        let lines: Vec<&str> = rendered.lines().collect();
        let shebang_idx = lines.iter().position(|l| *l == "#!/usr/bin/env tiniflow").unwrap();
        assert!(lines[..shebang_idx].iter().all(|l| !l.starts_with('*')));
    }

    #[test]
    fn disabled_prologue_omits_imports() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n";
        let rendered = render(src, "x.tf", &RenderOptions { disable_prologue: true, disable_epilogue: false }).unwrap();
        assert!(!rendered.contains("use tiniflow::workflow"));
    }

    #[test]
    fn disabled_epilogue_omits_run_call() {
        let src = "#!/usr/bin/env tiniflow\n* a = echo hi\n";
        let rendered = render(src, "x.tf", &RenderOptions { disable_prologue: false, disable_epilogue: true }).unwrap();
        assert!(!rendered.contains("group.run("));
    }

    #[test]
    fn passthrough_line_round_trips() {
        let src = "#!/usr/bin/env tiniflow\nlet x = 1;\n* a = echo hi\n";
        let rendered = render_default(src, "x.tf");
        assert!(rendered.contains("let x = 1;"));
    }
}
