//! Submission-time validation
//!
//! Rejection is not an error: `submit` returns `false` and counts the
//! [`RejectReason`]. Checks run cheapest-first.

use std::fmt;

use crate::command::{DrawCommand, DrawFlags};

/// Why a command was refused at submission
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Flagged as culled upstream
    Culled = 0,
    /// Negative vertex, index or instance count
    NegativeCount = 1,
    /// Negative vertex or index buffer id
    NegativeBuffer = 2,
    /// Negative first vertex/index or base instance (not encodable indirectly)
    NegativeOffset = 3,
    /// Indexed draw without a usable index buffer
    MissingIndexBuffer = 4,
    /// Fewer elements than one primitive needs
    TooFewElements = 5,
    /// Exact repeat of a command already submitted this frame
    Duplicate = 6,
    /// Frame was already flushed
    FrameClosed = 7,
}

impl RejectReason {
    pub const COUNT: usize = 8;

    pub const ALL: [RejectReason; Self::COUNT] = [
        RejectReason::Culled,
        RejectReason::NegativeCount,
        RejectReason::NegativeBuffer,
        RejectReason::NegativeOffset,
        RejectReason::MissingIndexBuffer,
        RejectReason::TooFewElements,
        RejectReason::Duplicate,
        RejectReason::FrameClosed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Culled => "culled",
            RejectReason::NegativeCount => "negative count",
            RejectReason::NegativeBuffer => "negative buffer id",
            RejectReason::NegativeOffset => "negative offset",
            RejectReason::MissingIndexBuffer => "missing index buffer",
            RejectReason::TooFewElements => "too few elements",
            RejectReason::Duplicate => "duplicate",
            RejectReason::FrameClosed => "frame closed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a command against the structural rules
///
/// Duplicates and closed frames are detected separately by the frame itself.
pub fn validate(cmd: &DrawCommand) -> Result<(), RejectReason> {
    if cmd.flags().contains(DrawFlags::CULLED) {
        return Err(RejectReason::Culled);
    }
    if cmd.vertex_count() < 0 || cmd.index_count() < 0 || cmd.instance_count() < 0 {
        return Err(RejectReason::NegativeCount);
    }
    if cmd.vertex_buffer() < 0 || cmd.index_buffer() < 0 {
        return Err(RejectReason::NegativeBuffer);
    }
    if cmd.first_vertex() < 0
        || cmd.first_index() < 0
        || cmd.base_instance() < 0
        || cmd.index_offset() < 0
    {
        return Err(RejectReason::NegativeOffset);
    }
    if cmd.is_indexed() && cmd.index_buffer() == 0 {
        return Err(RejectReason::MissingIndexBuffer);
    }
    if cmd.effective_count() < cmd.primitive().min_elements() {
        return Err(RejectReason::TooFewElements);
    }
    Ok(())
}
