//! Recorded capture traces.
//!
//! A trace is a JSON-lines file, one event per line, in capture order:
//!
//! ```text
//! {"event":"identity","candidate_id":"alice","confidence":0.92}
//! {"event":"frame","t_ms":0,"left":[[100,80],...],"right":[[140,80],...]}
//! {"event":"frame","t_ms":33}
//! ```
//!
//! Frame times are milliseconds from the start of the recording. A frame
//! without `left`/`right` had no face in view. Identity events are answers
//! from the recogniser, handed out in order each time a face is identified.
//! Blank lines and lines starting with `#` are ignored.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use rollcall_core::{
    EyeLandmarks, FaceLandmarks, Frame, IdentityMatch, IdentityMatcher, LandmarkPoint, MatchError,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: frame at {t_ms} ms is earlier than the previous frame")]
    OutOfOrder { line: usize, t_ms: u64 },
    #[error("line {line}: frame has landmarks for only one eye")]
    OneEye { line: usize },
    #[error("trace contains no frames")]
    NoFrames,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TraceEvent {
    Identity {
        candidate_id: Option<String>,
        confidence: f32,
    },
    Frame {
        t_ms: u64,
        left: Option<Vec<[f32; 2]>>,
        right: Option<Vec<[f32; 2]>>,
    },
}

/// One recorded frame, relative to the start of the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub t_ms: u64,
    pub landmarks: Option<FaceLandmarks>,
}

impl TraceFrame {
    /// The frame as captured at `base + t_ms`.
    pub fn at(&self, base: DateTime<Utc>) -> Frame {
        let captured_at = base + TimeDelta::milliseconds(self.t_ms as i64);
        match &self.landmarks {
            Some(face) => Frame::with_face(captured_at, face.clone()),
            None => Frame::without_face(captured_at),
        }
    }
}

/// A parsed trace.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub frames: Vec<TraceFrame>,
    pub identities: Vec<IdentityMatch>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut trace = Trace::default();
        let mut last_t_ms = 0;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }

            let event: TraceEvent =
                serde_json::from_str(raw).map_err(|source| TraceError::Parse { line, source })?;
            match event {
                TraceEvent::Identity {
                    candidate_id,
                    confidence,
                } => trace.identities.push(IdentityMatch {
                    candidate_id,
                    confidence,
                }),
                TraceEvent::Frame { t_ms, left, right } => {
                    if t_ms < last_t_ms {
                        return Err(TraceError::OutOfOrder { line, t_ms });
                    }
                    last_t_ms = t_ms;
                    let landmarks = match (left, right) {
                        (Some(left), Some(right)) => Some(FaceLandmarks {
                            left: eye(left),
                            right: eye(right),
                        }),
                        (None, None) => None,
                        _ => return Err(TraceError::OneEye { line }),
                    };
                    trace.frames.push(TraceFrame { t_ms, landmarks });
                }
            }
        }

        if trace.frames.is_empty() {
            return Err(TraceError::NoFrames);
        }
        Ok(trace)
    }

    /// Frames re-based onto wall-clock time.
    pub fn frames_from(&self, base: DateTime<Utc>) -> Vec<Frame> {
        self.frames.iter().map(|frame| frame.at(base)).collect()
    }

    /// A matcher answering with this trace's identity events, in order.
    pub fn matcher(&self) -> RecordedMatcher {
        RecordedMatcher {
            answers: self.identities.iter().cloned().collect(),
        }
    }
}

fn eye(points: Vec<[f32; 2]>) -> EyeLandmarks {
    EyeLandmarks(
        points
            .into_iter()
            .map(|[x, y]| LandmarkPoint::new(x, y))
            .collect(),
    )
}

/// Replays recorded recogniser answers. Fails once they run out.
#[derive(Debug, Clone)]
pub struct RecordedMatcher {
    answers: VecDeque<IdentityMatch>,
}

impl IdentityMatcher for RecordedMatcher {
    fn identify(&mut self, _frame: &Frame) -> Result<IdentityMatch, MatchError> {
        self.answers
            .pop_front()
            .ok_or_else(|| MatchError::Unavailable("no recorded identity left".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EYE: &str = "[[100,80],[108,76],[116,76],[124,80],[116,84],[108,84]]";

    fn frame_line(t_ms: u64) -> String {
        format!(r#"{{"event":"frame","t_ms":{t_ms},"left":{EYE},"right":{EYE}}}"#)
    }

    #[test]
    fn test_parse_events() {
        let text = format!(
            "# morning shift\n{}\n\n{}\n{}\n",
            r#"{"event":"identity","candidate_id":"alice","confidence":0.92}"#,
            frame_line(0),
            r#"{"event":"frame","t_ms":33}"#,
        );
        let trace = Trace::parse(&text).unwrap();

        assert_eq!(trace.identities, vec![IdentityMatch::new("alice", 0.92)]);
        assert_eq!(trace.frames.len(), 2);
        assert!(trace.frames[0].landmarks.is_some());
        assert_eq!(trace.frames[1].t_ms, 33);
        assert!(trace.frames[1].landmarks.is_none());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let text = format!("{}\nnot json\n", frame_line(0));
        match Trace::parse(&text) {
            Err(TraceError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_out_of_order_frames() {
        let text = format!("{}\n{}\n", frame_line(100), frame_line(50));
        assert!(matches!(
            Trace::parse(&text),
            Err(TraceError::OutOfOrder { line: 2, t_ms: 50 })
        ));
    }

    #[test]
    fn test_rejects_single_eye() {
        let text = format!(r#"{{"event":"frame","t_ms":0,"left":{EYE}}}"#);
        assert!(matches!(
            Trace::parse(&text),
            Err(TraceError::OneEye { line: 1 })
        ));
    }

    #[test]
    fn test_requires_frames() {
        let text = r#"{"event":"identity","candidate_id":null,"confidence":0.0}"#;
        assert!(matches!(Trace::parse(text), Err(TraceError::NoFrames)));
    }

    #[test]
    fn test_load_from_file_and_rebase() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", frame_line(0)).unwrap();
        writeln!(file, "{}", frame_line(250)).unwrap();

        let trace = Trace::load(file.path()).unwrap();
        let base = Utc::now();
        let frames = trace.frames_from(base);
        assert_eq!(frames[0].captured_at, base);
        assert_eq!(frames[1].captured_at, base + TimeDelta::milliseconds(250));
    }

    #[test]
    fn test_matcher_hands_out_answers_in_order() {
        let text = format!(
            "{}\n{}\n{}\n",
            r#"{"event":"identity","candidate_id":"bob","confidence":0.4}"#,
            r#"{"event":"identity","candidate_id":"bob","confidence":0.8}"#,
            frame_line(0),
        );
        let trace = Trace::parse(&text).unwrap();
        let frame = trace.frames[0].at(Utc::now());
        let mut matcher = trace.matcher();

        assert_eq!(matcher.identify(&frame).unwrap().confidence, 0.4);
        assert_eq!(matcher.identify(&frame).unwrap().confidence, 0.8);
        assert!(matches!(
            matcher.identify(&frame),
            Err(MatchError::Unavailable(_))
        ));
    }
}
