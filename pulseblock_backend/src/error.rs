//! Error type shared by every operation of the crate.
//!
//! All fallible operations return [`Result`]. Each [`Error`] variant carries the values needed to
//! correct the input (the offending pulses, the violated bound, the missing channels) and maps onto
//! one of four broad categories through [`Error::kind`]:
//!
//! - [`ErrorKind::Conflict`]: overlapping pulses, overlapping blocks or incompatible default pulses.
//! - [`ErrorKind::ChannelMapping`]: a channel map or offset map that does not fit the block.
//! - [`ErrorKind::HardwareConstraint`]: a sample count that violates hardware length limits.
//! - [`ErrorKind::Domain`]: arguments outside the domain of the operation.

use std::fmt;

use thiserror::Error;

/// Which neighbour of a freshly inserted pulse it collided with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}
impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Broad error category, see the module documentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    ChannelMapping,
    HardwareConstraint,
    Domain,
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error(
        "insert(): conflict on ch=\"{channel}\": given pulse\n   {new}\n\
         overlaps with existing pulse to the {side}\n   {existing}"
    )]
    PulseOverlap {
        channel: String,
        side: Side,
        new: String,
        existing: String,
    },

    #[error(
        "insert_block(): blocks overlap and cannot be merged: \
         offset t0={t0:.2e} but the {which} block lasts {duration:.2e} (shared channels {shared:?})"
    )]
    BlockOverlap {
        t0: f64,
        which: &'static str,
        duration: f64,
        shared: Vec<String>,
    },

    #[error(
        "insert_block(): conflict between default pulses on channel \"{channel}\":\n   \
         self: {ours}\n  other: {theirs}"
    )]
    DefaultMismatch {
        channel: String,
        ours: String,
        theirs: String,
    },

    #[error("{op}(): mapping does not cover channels {missing:?} (mapping keys are {provided:?})")]
    IncompleteMapping {
        op: &'static str,
        missing: Vec<String>,
        provided: Vec<String>,
    },

    #[error("remap_channels(): channels {sources:?} would all be renamed to \"{target}\"")]
    MappingCollision {
        target: String,
        sources: Vec<String>,
    },

    #[error("add_offset(): unknown channels {unknown:?} (block has pulses on {known:?})")]
    UnknownChannels {
        unknown: Vec<String>,
        known: Vec<String>,
    },

    #[error(
        "Calculated number of points {n_pts} does not match hardware step {len_step}. \
         To enable auto-appending of default values, set auto_adjust to true"
    )]
    LengthStep { n_pts: usize, len_step: usize },

    #[error(
        "Calculated number of points {n_pts} is below hardware minimum {len_min}. \
         Try increasing sampling rate or pulse block duration"
    )]
    LengthBelowMin { n_pts: usize, len_min: usize },

    #[error(
        "Calculated number of points {n_pts} is above hardware maximum {len_max}. \
         Try decreasing sampling rate or pulse block duration"
    )]
    LengthAboveMax { n_pts: usize, len_max: usize },

    #[error(
        "Every channel with non-default pulses must have a default pulse: \
         channels {missing:?} have pulses but no default (defaults are defined for {defaults:?})"
    )]
    MissingDefault {
        missing: Vec<String>,
        defaults: Vec<String>,
    },

    #[error(
        "Channel \"{channel}\" has a {default_kind} default pulse but pulse {pulse} \
         returns {pulse_kind} values"
    )]
    ReturnKindMismatch {
        channel: String,
        default_kind: String,
        pulse_kind: String,
        pulse: String,
    },

    #[error("{waveform} expects {frame}-frame times, but received invalid time point {time:e} ({reason})")]
    InvalidTime {
        waveform: String,
        frame: String,
        time: f64,
        reason: &'static str,
    },

    #[error("snip(): snip edge {edge}={edge_t:e} goes across pulse {pulse} on channel \"{channel}\"")]
    SnipCrossesPulse {
        channel: String,
        pulse: String,
        edge: &'static str,
        edge_t: f64,
    },

    #[error("{0}")]
    InvalidArgument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PulseOverlap { .. } | Error::BlockOverlap { .. } | Error::DefaultMismatch { .. } => {
                ErrorKind::Conflict
            }
            Error::IncompleteMapping { .. }
            | Error::MappingCollision { .. }
            | Error::UnknownChannels { .. } => ErrorKind::ChannelMapping,
            Error::LengthStep { .. } | Error::LengthBelowMin { .. } | Error::LengthAboveMax { .. } => {
                ErrorKind::HardwareConstraint
            }
            Error::MissingDefault { .. }
            | Error::ReturnKindMismatch { .. }
            | Error::InvalidTime { .. }
            | Error::SnipCrossesPulse { .. }
            | Error::InvalidArgument(_) => ErrorKind::Domain,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds() {
        let err = Error::LengthStep {
            n_pts: 100,
            len_step: 64,
        };
        assert_eq!(err.kind(), ErrorKind::HardwareConstraint);
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("64"));

        let err = Error::IncompleteMapping {
            op: "remap_channels",
            missing: vec!["ch2".to_string()],
            provided: vec!["ch1".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::ChannelMapping);
        assert!(err.to_string().contains("ch2"));

        assert_eq!(Error::invalid("bad").kind(), ErrorKind::Domain);
    }
}
