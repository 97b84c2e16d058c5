// src/workflow/tag.rs
//
// Metadata tokens: the `on.*` family recognized on edges, plus the
// synthetic `tf-*` tokens the propagation rule writes onto node metadata.
// Kept as a closed enum instead of bare strings so the rest of the crate
// matches on them instead of re-parsing text.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Data,
    Control,
    Start,
    Always,
    Success,
    Failure,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Data => "data",
            Tag::Control => "control",
            Tag::Start => "on.start",
            Tag::Always => "on.always",
            Tag::Success => "on.success",
            Tag::Failure => "on.failure",
        }
    }
}

/// Recognizes a metadata token emitted as a bare `EdgeSegment::Meta` piece.
/// Anything not matching one of the known `on.*` spellings is treated as an
/// opaque passthrough token (kept verbatim in the edge's metadata Vec) since
/// user DSL text can carry arbitrary annotations the executor ignores.
pub fn normalize_token(raw: &str) -> String {
    raw.trim().to_string()
}

/// Convenience constructors for the `on.start`/`on.success`/etc. tag
/// spellings, usable from both the DSL interpreter and direct Rust API
/// callers building a workflow by hand.
pub mod on {
    pub const START: &str = "on.start";
    pub const ALWAYS: &str = "on.always";
    pub const SUCCESS: &str = "on.success";
    pub const FAILURE: &str = "on.failure";
    pub const DATA: &str = "on.data";
    pub const CONTROL: &str = "on.control";
}
