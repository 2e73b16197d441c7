//! Python bindings, enabled with the `python` feature.
//!
//! PyO3 can't export trait objects or generic methods, so the Rust types are wrapped in thin
//! `#[pyclass]` structs and every method forwards to the Rust implementation. Errors are turned
//! into Python exceptions: channel-mapping errors raise `KeyError`, everything else `ValueError`.
//!
//! # Example (python)
//! ```python
//! from pulseblock_backend import Pulse, DefaultPulse, PulseBlock, pb_sample
//!
//! pb = PulseBlock(dflt_dict={"ch1": DefaultPulse.low()})
//! pb.insert(Pulse.high("ch1", 0, 10e-9))
//! pb.insert(Pulse.high("ch1", 20e-9, 10e-9))
//! samp_dict, n_pts, add_pts = pb_sample(pb, samp_rate=1e9)
//! assert n_pts == 31
//! ```

use std::collections::HashMap;

use pyo3::exceptions::{PyKeyError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::block::PulseBlock;
use crate::error::*;
use crate::pulse::*;
use crate::sample::*;

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        match err.kind() {
            ErrorKind::ChannelMapping => PyKeyError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

#[pyclass(name = "Pulse")]
#[derive(Clone)]
pub struct PyPulse {
    pub inner: Pulse,
}

#[pymethods]
impl PyPulse {
    #[staticmethod]
    fn high(ch: &str, t0: f64, dur: f64) -> Self {
        Self {
            inner: Pulse::high(ch, t0, dur),
        }
    }

    #[staticmethod]
    fn low(ch: &str, t0: f64, dur: f64) -> Self {
        Self {
            inner: Pulse::low(ch, t0, dur),
        }
    }

    #[staticmethod]
    fn const_(ch: &str, t0: f64, dur: f64, val: f64) -> Self {
        Self {
            inner: Pulse::constant(ch, t0, dur, val),
        }
    }

    /// Phase `ph` is in radians.
    #[staticmethod]
    #[pyo3(signature = (ch, t0, dur, amp, freq, ph, dc=None))]
    fn sin(ch: &str, t0: f64, dur: f64, amp: f64, freq: f64, ph: f64, dc: Option<f64>) -> Self {
        Self {
            inner: Pulse::sin(ch, t0, dur, amp, freq, ph, dc),
        }
    }

    #[staticmethod]
    fn linramp(ch: &str, t0: f64, dur: f64, start: f64, end: f64) -> Self {
        Self {
            inner: Pulse::linramp(ch, t0, dur, start, end),
        }
    }

    #[getter]
    fn ch(&self) -> String {
        self.inner.channel.clone()
    }

    #[getter]
    fn t0(&self) -> f64 {
        self.inner.t0
    }

    #[getter]
    fn dur(&self) -> f64 {
        self.inner.duration
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __repr__(&self) -> String {
        format!("Pulse(ch={:?}, {})", self.inner.channel, self.inner)
    }
}

#[pyclass(name = "DefaultPulse")]
#[derive(Clone)]
pub struct PyDefaultPulse {
    pub inner: DefaultPulse,
}

#[pymethods]
impl PyDefaultPulse {
    #[staticmethod]
    fn high() -> Self {
        Self {
            inner: DefaultPulse::high(),
        }
    }

    #[staticmethod]
    fn low() -> Self {
        Self {
            inner: DefaultPulse::low(),
        }
    }

    #[staticmethod]
    fn const_(val: f64) -> Self {
        Self {
            inner: DefaultPulse::constant(val),
        }
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __eq__(&self, other: PyRef<Self>) -> bool {
        self.inner == other.inner
    }
}

#[pyclass(name = "PulseBlock")]
#[derive(Clone)]
pub struct PyPulseBlock {
    pub inner: PulseBlock,
}

#[pymethods]
impl PyPulseBlock {
    /// Constructor for the `PulseBlock` class.
    ///
    /// # Example (python)
    /// ```python
    /// from pulseblock_backend import Pulse, DefaultPulse, PulseBlock
    ///
    /// pb = PulseBlock(
    ///     p_obj_list=[Pulse.high("aom", -5e-9, 5e-9), Pulse.high("aom", 0, 10e-9)],
    ///     dflt_dict={"aom": DefaultPulse.low()},
    ///     name="readout",
    /// )
    /// assert abs(pb.duration - 15e-9) < 1e-15
    /// ```
    #[new]
    #[pyo3(signature = (p_obj_list=None, dflt_dict=None, name=""))]
    fn new(
        p_obj_list: Option<Vec<PyPulse>>,
        dflt_dict: Option<HashMap<String, PyDefaultPulse>>,
        name: &str,
    ) -> PyResult<Self> {
        let pulses = p_obj_list
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.inner)
            .collect();
        let defaults = dflt_dict
            .unwrap_or_default()
            .into_iter()
            .map(|(ch, d)| (ch, d.inner));
        Ok(Self {
            inner: PulseBlock::new(pulses, defaults, name)?,
        })
    }

    #[getter]
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    #[getter]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    fn channels(&self) -> Vec<String> {
        self.inner.channels().into_iter().map(String::from).collect()
    }

    fn set_default(&mut self, ch: &str, dflt: PyDefaultPulse) {
        self.inner.set_default(ch, dflt.inner);
    }

    #[pyo3(signature = (p_obj, cflct_er=true))]
    fn insert(&mut self, p_obj: PyPulse, cflct_er: bool) -> PyResult<()> {
        Ok(self.inner.insert(p_obj.inner, cflct_er)?)
    }

    #[pyo3(signature = (p_obj, cflct_er=true))]
    fn join(&self, p_obj: PyPulse, cflct_er: bool) -> PyResult<Self> {
        Ok(Self {
            inner: self.inner.join(p_obj.inner, cflct_er)?,
        })
    }

    #[pyo3(signature = (p_obj, cflct_er=true))]
    fn append(&mut self, p_obj: PyPulse, cflct_er: bool) -> PyResult<()> {
        Ok(self.inner.append(p_obj.inner, cflct_er)?)
    }

    #[pyo3(signature = (pb_obj, t0=0.0, cflct_er=true))]
    fn insert_block(&mut self, pb_obj: PyPulseBlock, t0: f64, cflct_er: bool) -> PyResult<()> {
        Ok(self.inner.insert_block(&pb_obj.inner, t0, cflct_er)?)
    }

    #[pyo3(signature = (pb_obj, t0=0.0, cflct_er=true, name=None))]
    fn join_block(
        &self,
        pb_obj: PyPulseBlock,
        t0: f64,
        cflct_er: bool,
        name: Option<&str>,
    ) -> PyResult<Self> {
        let mut inner = self.inner.join_block(&pb_obj.inner, t0, cflct_er)?;
        if let Some(name) = name {
            inner.set_name(name);
        }
        Ok(Self { inner })
    }

    #[pyo3(signature = (pb_obj, offset=0.0, cflct_er=true))]
    fn append_block(&mut self, pb_obj: PyPulseBlock, offset: f64, cflct_er: bool) -> PyResult<()> {
        Ok(self.inner.append_block(&pb_obj.inner, offset, cflct_er)?)
    }

    fn remap_channels(&mut self, ch_map: HashMap<String, String>) -> PyResult<()> {
        Ok(self.inner.remap_channels(&ch_map)?)
    }

    fn add_offset(&mut self, offset_dict: HashMap<String, f64>) -> PyResult<()> {
        Ok(self.inner.add_offset(&offset_dict)?)
    }

    fn normalize_edges(&mut self) {
        self.inner.normalize_edges();
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }
}

/// Samples a `PulseBlock` and returns `(samp_dict, n_pts, add_pts)`, where `samp_dict` maps every
/// channel to a numpy array (`bool` for digital channels, `float64` for analog ones).
#[pyfunction]
#[pyo3(signature = (pb_obj, samp_rate, len_min=0, len_max=None, len_step=1, len_adj=true))]
pub fn pb_sample(
    py: Python,
    pb_obj: PyRef<PyPulseBlock>,
    samp_rate: f64,
    len_min: usize,
    len_max: Option<usize>,
    len_step: usize,
    len_adj: bool,
) -> PyResult<(PyObject, usize, usize)> {
    let constraints = HardwareConstraints {
        len_min,
        len_max: len_max.unwrap_or(usize::MAX),
        len_step,
        auto_adjust: len_adj,
    };
    let res = sample(&pb_obj.inner, samp_rate, &constraints)?;

    let samp_dict = PyDict::new(py);
    for (ch, samples) in res.samples.iter() {
        let arr = match samples {
            Samples::Bool(arr) => numpy::PyArray::from_array(py, arr).to_object(py),
            Samples::Float(arr) => numpy::PyArray::from_array(py, arr).to_object(py),
        };
        samp_dict.set_item(ch, arr)?;
    }
    Ok((samp_dict.to_object(py), res.n_pts, res.add_pts))
}
