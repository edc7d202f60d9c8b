//! Hand keypoints and single-hand frame poses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_DIP: usize = 11;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_DIP: usize = 15;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

pub const KEYPOINT_COUNT: usize = 21;

/// One tracked landmark. x/y are normalized to the video frame, z is the
/// tracker's relative depth and is never used for classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

#[cfg(test)]
impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Planar point in normalized display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Error, PartialEq)]
pub enum PoseError {
    #[error("expected 21 keypoints, got {0}")]
    WrongLength(usize),
    #[error("keypoint {0} has a non-finite coordinate")]
    NonFinite(usize),
}

/// All 21 keypoints of one hand in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePose {
    points: [Keypoint; KEYPOINT_COUNT],
}

impl FramePose {
    pub fn new(points: Vec<Keypoint>) -> Result<Self, PoseError> {
        if let Some(i) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(PoseError::NonFinite(i));
        }
        let len = points.len();
        let points: [Keypoint; KEYPOINT_COUNT] =
            points.try_into().map_err(|_| PoseError::WrongLength(len))?;
        Ok(Self { points })
    }

    #[cfg(test)]
    pub fn points(&self) -> &[Keypoint; KEYPOINT_COUNT] {
        &self.points
    }

    /// Planar distance between two landmarks.
    pub fn dist(&self, a: usize, b: usize) -> f32 {
        dist(&self.points[a], &self.points[b])
    }

    pub fn centroid(&self, indices: &[usize]) -> Point {
        if indices.is_empty() {
            return Point { x: 0.5, y: 0.5 };
        }
        let n = indices.len() as f32;
        let sumx: f32 = indices.iter().map(|&i| self.points[i].x).sum();
        let sumy: f32 = indices.iter().map(|&i| self.points[i].y).sum();
        Point {
            x: sumx / n,
            y: sumy / n,
        }
    }
}

pub fn dist(a: &Keypoint, b: &Keypoint) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic upright right-hand poses shared by the classifier,
    //! ability and processor tests.
    use super::*;

    const WRIST_POS: (f32, f32) = (0.5, 0.9);

    /// Column x and (mcp, pip, dip, tip) y values for an extended finger.
    const FINGERS: [(f32, [f32; 4]); 4] = [
        (0.42, [0.70, 0.60, 0.53, 0.47]),
        (0.50, [0.69, 0.58, 0.50, 0.44]),
        (0.58, [0.70, 0.60, 0.53, 0.48]),
        (0.65, [0.73, 0.65, 0.60, 0.55]),
    ];

    pub struct HandBuilder {
        pts: Vec<Keypoint>,
    }

    impl HandBuilder {
        /// Flat hand, all four fingers extended, thumb tucked under the palm.
        pub fn new() -> Self {
            let mut pts = vec![Keypoint::default(); KEYPOINT_COUNT];
            pts[WRIST] = Keypoint::new(WRIST_POS.0, WRIST_POS.1);
            pts[THUMB_CMC] = Keypoint::new(0.45, 0.85);
            pts[THUMB_MCP] = Keypoint::new(0.41, 0.80);
            pts[THUMB_IP] = Keypoint::new(0.43, 0.79);
            pts[THUMB_TIP] = Keypoint::new(0.47, 0.80);
            for (f, (x, ys)) in FINGERS.iter().enumerate() {
                let base = INDEX_MCP + f * 4;
                for (j, y) in ys.iter().enumerate() {
                    pts[base + j] = Keypoint::new(*x, *y);
                }
            }
            Self { pts }
        }

        pub fn thumb_out(mut self) -> Self {
            self.pts[THUMB_IP] = Keypoint::new(0.33, 0.74);
            self.pts[THUMB_TIP] = Keypoint::new(0.27, 0.70);
            self
        }

        /// Folds finger `f` (0 = index .. 3 = pinky): tip curls back
        /// below the pip joint, closer to the wrist.
        pub fn fold(mut self, f: usize) -> Self {
            let base = INDEX_MCP + f * 4;
            let x = FINGERS[f].0;
            self.pts[base + 2] = Keypoint::new(x, 0.66);
            self.pts[base + 3] = Keypoint::new(x, 0.70);
            self
        }

        pub fn fold_all(self) -> Self {
            self.fold(0).fold(1).fold(2).fold(3)
        }

        pub fn set(mut self, idx: usize, x: f32, y: f32) -> Self {
            self.pts[idx] = Keypoint::new(x, y);
            self
        }

        pub fn points(self) -> Vec<Keypoint> {
            self.pts
        }

        pub fn build(self) -> FramePose {
            FramePose::new(self.pts).expect("fixture has 21 points")
        }
    }

    pub fn open_palm() -> FramePose {
        HandBuilder::new().thumb_out().build()
    }

    pub fn fist() -> FramePose {
        HandBuilder::new().fold_all().build()
    }

    /// Thumb tip resting on the middle fingertip.
    pub fn snap() -> FramePose {
        HandBuilder::new()
            .fold(2)
            .fold(3)
            .set(THUMB_TIP, 0.51, 0.45)
            .build()
    }

    /// Thumb tip resting on the index fingertip.
    pub fn pinch() -> FramePose {
        HandBuilder::new()
            .fold(2)
            .fold(3)
            .set(THUMB_TIP, 0.43, 0.48)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_pose() {
        let err = FramePose::new(vec![Keypoint::default(); 20]).unwrap_err();
        assert_eq!(err, PoseError::WrongLength(20));
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let mut pts = vec![Keypoint::default(); KEYPOINT_COUNT];
        pts[7].y = f32::NAN;
        assert_eq!(FramePose::new(pts).unwrap_err(), PoseError::NonFinite(7));
    }

    #[test]
    fn distance_ignores_depth() {
        let a = Keypoint { x: 0.0, y: 0.0, z: 5.0 };
        let b = Keypoint { x: 0.3, y: 0.4, z: -5.0 };
        assert!((dist(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_three_tips() {
        let pose = fixtures::HandBuilder::new()
            .set(THUMB_TIP, 0.1, 0.2)
            .set(INDEX_TIP, 0.4, 0.5)
            .set(MIDDLE_TIP, 0.7, 0.8)
            .build();
        let c = pose.centroid(&[THUMB_TIP, INDEX_TIP, MIDDLE_TIP]);
        assert!((c.x - 0.4).abs() < 1e-6);
        assert!((c.y - 0.5).abs() < 1e-6);
    }
}
