//! Capability traits for the collaborators the engine does not own.
//!
//! Any landmark backend that can hand over frames, and any recognition
//! backend that can name a candidate with a confidence, can drive the
//! engine. Neither is assumed to be fast or infallible.

use thiserror::Error;

use crate::types::{Frame, IdentityMatch};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("identity matcher unavailable: {0}")]
    Unavailable(String),
    #[error("identity matcher timed out")]
    Timeout,
    #[error("identity matcher failed: {0}")]
    Backend(String),
}

/// Per-frame landmark provider, e.g. a camera plus landmark model.
pub trait FrameSource {
    /// Next frame in capture order, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Identity embedding and gallery search.
pub trait IdentityMatcher {
    /// Identify the face in `frame`. Blocking; may be slow.
    fn identify(&mut self, frame: &Frame) -> Result<IdentityMatch, MatchError>;
}

impl<I> FrameSource for I
where
    I: Iterator<Item = Frame>,
{
    fn next_frame(&mut self) -> Option<Frame> {
        self.next()
    }
}
