//! Color scoring
//!
//! Scores a submitted color against the day's target by Euclidean distance
//! in RGB space, normalized against the cube diagonal:
//!
//! ```text
//! d     = sqrt((tR-sR)² + (tG-sG)² + (tB-sB)²)
//! dMax  = sqrt(3 · 255²) ≈ 441.673
//! score = clamp(round((1 - d/dMax) · 100), 0, 100)
//! ```
//!
//! Rounding is half away from zero (`f64::round`), so boundary scores are
//! reproducible for identical inputs.

use serde::{Deserialize, Serialize};

use crate::error::ChallengeError;

/// Maximum distance between two colors in the RGB cube
pub const MAX_DISTANCE: f64 = 441.672_955_930_063_7;

/// An RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from wide integers, rejecting anything outside 0..=255
    pub fn from_components(r: i64, g: i64, b: i64) -> Result<Self, ChallengeError> {
        let channel = |name: &str, v: i64| {
            u8::try_from(v).map_err(|_| {
                ChallengeError::InvalidInput(format!(
                    "{} must be between 0 and 255, got {}",
                    name, v
                ))
            })
        };
        Ok(Self::new(channel("r", r)?, channel("g", g)?, channel("b", b)?))
    }

    /// `rgb(r,g,b)` form used in API responses
    pub fn css(&self) -> String {
        format!("rgb({},{},{})", self.r, self.g, self.b)
    }

    /// `#RRGGBB`
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    fn distance(&self, other: &Rgb) -> f64 {
        let dr = f64::from(self.r) - f64::from(other.r);
        let dg = f64::from(self.g) - f64::from(other.g);
        let db = f64::from(self.b) - f64::from(other.b);
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.css())
    }
}

/// Score a submission against the target, 0..=100
pub fn score(target: Rgb, submitted: Rgb) -> u8 {
    let similarity = 1.0 - target.distance(&submitted) / MAX_DISTANCE;
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Player-facing feedback for a score
pub fn feedback(score: u8, attempts_left: u32) -> String {
    let mut message = match score {
        100 => "Perfect match! You got the exact color!",
        90..=99 => "Excellent! Very close!",
        75..=89 => "Great job! Pretty close!",
        50..=74 => "Not bad! Keep trying!",
        _ => "Keep practicing!",
    }
    .to_string();

    if attempts_left == 0 {
        message.push_str(" No more attempts left for today.");
    }

    message
}
