// tests/dsl_properties.rs
//
// Property-based coverage for the tokenizer's structural invariants, as
// opposed to the example-driven unit tests living beside `dsl::mod`. Each
// property here generates many small `.tf` sources and checks a guarantee
// that should hold for all of them, not just the hand-picked cases.

use proptest::prelude::*;

use tiniflow::dsl::{parse_blocks, Block, SigilTable};

fn passthrough_line() -> impl Strategy<Value = String> {
    // Printable ASCII that can't accidentally collide with a sigil/rebind
    // prefix at the start of the line once trimmed.
    "[a-zA-Z0-9 _,.;:'\"/\\\\]{0,40}".prop_filter("must not start with a recognized sigil", |s| {
        let table = SigilTable::default();
        let trimmed = s.trim_start();
        !trimmed.starts_with('$')
            && !trimmed.starts_with(table.node)
            && !trimmed.starts_with(table.edge)
            && !trimmed.starts_with(table.workflow)
    })
}

proptest! {
    /// Invariant 1: any line not beginning with a recognized sigil passes
    /// through the tokenizer unchanged, verbatim text and all.
    #[test]
    fn passthrough_lines_round_trip(line in passthrough_line()) {
        let source = format!("#!/usr/bin/env tiniflow\n{line}\n");
        let (_, blocks) = parse_blocks(&source).expect("shebang present, line isn't a sigil");
        prop_assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            Block::Passthrough { text, .. } => prop_assert_eq!(text, &line),
            other => prop_assert!(false, "expected Passthrough, got {:?}", other),
        }
    }

    /// Invariant 2: the first output line is always exactly the input's
    /// first line, whatever shebang interpreter path it names.
    #[test]
    fn shebang_is_preserved_verbatim(rest in "[a-zA-Z0-9/._-]{1,30}") {
        let shebang = format!("#!{rest}");
        let source = format!("{shebang}\n* a = echo hi\n");
        let (returned_shebang, _) = parse_blocks(&source).expect("well-formed shebang");
        prop_assert_eq!(returned_shebang, shebang);
    }

    /// Invariant 3: edge classification is total -- any payload split on
    /// exactly one separator kind classifies as data xor control, never
    /// both, never neither, regardless of chain length.
    #[test]
    fn edge_classification_is_total(chain_len in 2usize..6, use_control in any::<bool>()) {
        use tiniflow::dsl::{split_edge_payload};
        use tiniflow::workflow::{EdgeSegment, Workflow};

        let sep = if use_control { '-' } else { '|' };
        let mut wf = Workflow::default();
        let mut names = Vec::new();
        for i in 0..chain_len {
            wf.add_node(format!("cmd{i}"), vec![]);
            names.push(format!("n{i}"));
        }
        let payload = names.join(&sep.to_string());
        let table = SigilTable::default();
        let split = split_edge_payload(&payload, &table);

        let handles: Vec<_> = wf.nodes.clone();
        let segments = vec![EdgeSegment::Chain(handles)];
        let edge = wf.add_edge(segments, &split.seps).expect("single separator kind");

        let is_data = edge.borrow().has_tag(tiniflow::workflow::Tag::Data);
        let is_control = edge.borrow().has_tag(tiniflow::workflow::Tag::Control);
        prop_assert_ne!(is_data, is_control);
    }

    /// Invariant 4: an edge payload whose chain mixes both separator kinds
    /// is always rejected, never silently classified either way.
    #[test]
    fn mixed_separators_are_always_rejected(chain_len in 3usize..6) {
        use tiniflow::workflow::Workflow;

        let mut wf = Workflow::default();
        let mut handles = Vec::new();
        for i in 0..chain_len {
            handles.push(wf.add_node(format!("cmd{i}"), vec![]));
        }
        // Alternate `|`/`-` across the chain so both separator kinds are
        // observed no matter how long the chain is.
        let seps: Vec<char> = (0..chain_len - 1).map(|i| if i % 2 == 0 { '|' } else { '-' }).collect();
        let result = wf.add_edge(
            vec![tiniflow::workflow::EdgeSegment::Chain(handles)],
            &[seps],
        );
        prop_assert!(result.is_err());
    }
}
