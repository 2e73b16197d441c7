//! # Pulse-sequence backend
//!
//! Builds timed multi-channel pulse sequences and rasterizes them into fixed-rate sample arrays
//! for output hardware (AWGs, DAQ cards, pulse generators).
//!
//! ## Overview
//!
//! - [`pulse`]: pulse primitives. A [`Waveform`] maps time points to samples; a [`Pulse`] places
//!   a waveform on a channel at `t0` for `duration`; a [`DefaultPulse`] is the idle waveform of a
//!   channel.
//! - [`block`]: [`PulseBlock`], the sparse ordered-interval container. Channels hold sorted,
//!   non-overlapping pulses; blocks can be joined with time offsets and their channels renamed.
//! - [`sample`]: [`sample()`] rasterizes a block under [`HardwareConstraints`] (minimal and
//!   maximal length, length step).
//! - [`zip`]: collapses idle stretches of a block into repetitions of a short wait block.
//! - [`error`]: the crate-wide [`Error`] type.
//! - [`utils`]: float-grid helpers and a timing logger.
//!
//! With the `python` feature, the crate builds into a Python extension module exposing
//! `Pulse`, `DefaultPulse`, `PulseBlock` and `pb_sample`.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger itself. Python users get
//! the records in the standard `logging` module.

pub mod block;
pub mod error;
pub mod pulse;
pub mod sample;
pub mod utils;
pub mod zip;

#[cfg(feature = "python")]
pub mod python;

pub use block::*;
pub use error::*;
pub use pulse::*;
pub use sample::*;
pub use utils::*;
pub use zip::*;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn pulseblock_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    pyo3_log::init();
    m.add_class::<python::PyPulse>()?;
    m.add_class::<python::PyDefaultPulse>()?;
    m.add_class::<python::PyPulseBlock>()?;
    m.add_function(wrap_pyfunction!(python::pb_sample, m)?)?;
    Ok(())
}
