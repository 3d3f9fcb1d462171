use serde::{Deserialize, Serialize};

use crate::KinfitError;

/// Start and end time of every frame of a dynamic scan.
///
/// Frames must be ordered in time and may not overlap. Gaps between frames
/// are allowed. A frame of zero duration is treated as a point sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTiming {
    start: Vec<f64>,
    end: Vec<f64>,
}

impl FrameTiming {
    /// Create frame timing from explicit start and end times.
    pub fn new(start: Vec<f64>, end: Vec<f64>) -> Result<Self, KinfitError> {
        KinfitError::check_len("frame end times", start.len(), end.len())?;
        KinfitError::check_finite("frame start times", &start)?;
        KinfitError::check_finite("frame end times", &end)?;
        if start.is_empty() {
            return Err(KinfitError::InvalidTiming {
                frame: 0,
                reason: "scan has no frames".to_string(),
            });
        }

        for (frame, (&s, &e)) in start.iter().zip(end.iter()).enumerate() {
            if s < 0.0 {
                return Err(KinfitError::InvalidTiming {
                    frame,
                    reason: format!("start time {} is negative", s),
                });
            }
            if e < s {
                return Err(KinfitError::InvalidTiming {
                    frame,
                    reason: format!("end time {} precedes start time {}", e, s),
                });
            }
            if frame > 0 && s < end[frame - 1] {
                return Err(KinfitError::InvalidTiming {
                    frame,
                    reason: format!(
                        "start time {} overlaps previous frame ending at {}",
                        s,
                        end[frame - 1]
                    ),
                });
            }
        }

        Ok(Self { start, end })
    }

    /// Create frame timing from consecutive frame durations, starting at zero.
    pub fn from_durations(durations: &[f64]) -> Result<Self, KinfitError> {
        KinfitError::check_finite("frame durations", durations)?;
        let mut start = Vec::with_capacity(durations.len());
        let mut end = Vec::with_capacity(durations.len());
        let mut t = 0.0;
        for (frame, &d) in durations.iter().enumerate() {
            if d < 0.0 {
                return Err(KinfitError::InvalidTiming {
                    frame,
                    reason: format!("duration {} is negative", d),
                });
            }
            start.push(t);
            t += d;
            end.push(t);
        }
        Self::new(start, end)
    }

    /// Create frame timing from a column-major `num_frm x 2` buffer
    /// holding start times followed by end times.
    pub fn from_column_major(buffer: &[f64], num_frm: usize) -> Result<Self, KinfitError> {
        KinfitError::check_len("scan timing", 2 * num_frm, buffer.len())?;
        let (start, end) = buffer.split_at(num_frm);
        Self::new(start.to_vec(), end.to_vec())
    }

    pub fn num_frames(&self) -> usize {
        self.start.len()
    }

    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn end(&self) -> &[f64] {
        &self.end
    }

    /// Mid-time of each frame
    pub fn mid_times(&self) -> Vec<f64> {
        self.start
            .iter()
            .zip(self.end.iter())
            .map(|(s, e)| 0.5 * (s + e))
            .collect()
    }

    /// End of the last frame
    pub fn scan_end(&self) -> f64 {
        self.end.last().copied().unwrap_or(0.0)
    }
}
