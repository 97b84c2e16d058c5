// src/error.rs
//
// =============================================================================
// TINIFLOW: ERROR TAXONOMY
// =============================================================================
//
// Transpilation and graph construction errors are typed and matchable
// (thiserror); the CLI boundary flattens everything into `anyhow::Result`
// for its subcommands.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TiniflowError {
    #[error("first line must be a shebang (e.g. `#!/usr/bin/env tiniflow`)")]
    MissingShebang,

    #[error("cannot mix data & control separators in the same edge (observed: {observed:?})")]
    MixedSeparators { observed: Vec<char> },

    #[error("workflow index {index} out of range (have {len} workflow(s))")]
    UnknownWorkflowIndex { index: i64, len: usize },

    #[error("malformed DSL block at line {line}: `{text}`")]
    MalformedBlock { line: usize, text: String },

    #[error("unrecognized metadata token `{0}` (expected one of on.start/on.always/on.success/on.failure/on.data/on.control)")]
    UnknownTag(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("OS error: {0}")]
    Os(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, TiniflowError>;
