//! Transition Animations
//!
//! Expands a named transition and a duration into the three style fragments
//! the rotation loop injects into render surfaces:
//!
//! - `out`: applied to the leaving surface when the transition starts
//! - `after`: applied once to a surface while it is not yet visible
//! - `in`: applied to the entering surface at the midpoint
//!
//! Each half of the transition takes `half_duration = floor(duration / 2)`
//! milliseconds. The rotation loop schedules the transition `half_duration`
//! before the air-time boundary so the actual swap lands on the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default transition name
pub const DEFAULT_TRANSITION: TransitionKind = TransitionKind::Fade;

/// Default transition duration in milliseconds
pub const DEFAULT_TRANSITION_MS: u64 = 400;

/// Known transition variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Hard cut, no styles
    #[serde(rename = "none")]
    None,
    /// Crossfade through opacity
    #[serde(rename = "fade")]
    Fade,
    /// Leaving page moves up, entering page comes from below
    #[serde(rename = "slideUp")]
    SlideUp,
    /// Leaving page moves left, entering page comes from the right
    #[serde(rename = "slideLeft")]
    SlideLeft,
}

impl TransitionKind {
    /// Configuration name (case-sensitive)
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fade => "fade",
            Self::SlideUp => "slideUp",
            Self::SlideLeft => "slideLeft",
        }
    }

    /// `(out, after, in)` templates; `@duration` is replaced by the half duration
    fn templates(self) -> Option<(&'static str, &'static str, &'static str)> {
        match self {
            Self::None => None,
            Self::Fade => Some((
                "opacity: 0; transition: opacity @durationms ease-in;",
                "opacity: 0;",
                "opacity: 1; transition: opacity @durationms ease-out;",
            )),
            Self::SlideUp => Some((
                "transform: translateY(-100%); transition: transform @durationms ease-in;",
                "transform: translateY(100%);",
                "transform: translateY(0); transition: transform @durationms ease-out;",
            )),
            Self::SlideLeft => Some((
                "transform: translateX(-100%); transition: transform @durationms ease-in;",
                "transform: translateX(100%);",
                "transform: translateX(0); transition: transform @durationms ease-out;",
            )),
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransitionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "fade" => Ok(Self::Fade),
            "slideUp" => Ok(Self::SlideUp),
            "slideLeft" => Ok(Self::SlideLeft),
            other => Err(ConfigError::UnknownTransition {
                name: other.to_string(),
            }),
        }
    }
}

/// Concrete style fragments of a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionStyles {
    /// Applied to the leaving surface
    pub out: String,
    /// Applied to a surface before it becomes visible
    pub after: String,
    /// Applied to the entering surface
    pub enter: String,
}

/// A resolved transition animation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionAnimation {
    /// Variant
    pub kind: TransitionKind,
    /// Configured duration in milliseconds
    pub duration_ms: u64,
    /// `floor(duration_ms / 2)`, or 0 for [`TransitionKind::None`]
    pub half_duration_ms: u64,
    /// Style fragments, absent for [`TransitionKind::None`]
    pub styles: Option<TransitionStyles>,
}

impl Default for TransitionAnimation {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSITION, DEFAULT_TRANSITION_MS)
    }
}

impl TransitionAnimation {
    /// Resolve a transition by configuration name
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTransition`] if `name` is not one of
    /// `none`, `fade`, `slideUp`, `slideLeft`.
    pub fn resolve(name: &str, duration_ms: u64) -> Result<Self, ConfigError> {
        Ok(Self::new(name.parse()?, duration_ms))
    }

    /// Build a transition from a known variant
    #[must_use]
    pub fn new(kind: TransitionKind, duration_ms: u64) -> Self {
        let Some((out, after, enter)) = kind.templates() else {
            return Self {
                kind,
                duration_ms,
                half_duration_ms: 0,
                styles: None,
            };
        };

        let half_duration_ms = duration_ms / 2;
        let render = |template: &str| {
            format!(
                "html {{ {} }}",
                template.replace("@duration", &half_duration_ms.to_string())
            )
        };

        Self {
            kind,
            duration_ms,
            half_duration_ms,
            styles: Some(TransitionStyles {
                out: render(out),
                after: render(after),
                enter: render(enter),
            }),
        }
    }

    /// A hard cut
    #[must_use]
    pub fn none() -> Self {
        Self::new(TransitionKind::None, 0)
    }

    /// Scheduler offset that centers the transition on the air-time boundary
    #[must_use]
    pub fn schedule_offset_ms(&self) -> i64 {
        -i64::try_from(self.half_duration_ms).unwrap_or(i64::MAX)
    }

    /// Style for the leaving surface
    #[must_use]
    pub fn out_style(&self) -> Option<&str> {
        self.styles.as_ref().map(|s| s.out.as_str())
    }

    /// Reset style for a surface that is not yet visible
    #[must_use]
    pub fn after_style(&self) -> Option<&str> {
        self.styles.as_ref().map(|s| s.after.as_str())
    }

    /// Style for the entering surface
    #[must_use]
    pub fn in_style(&self) -> Option<&str> {
        self.styles.as_ref().map(|s| s.enter.as_str())
    }
}
