//! Provides definitions and implementations for pulse primitives.
//!
//! ## Main Structures and Traits:
//!
//! - [`Waveform`]: the single capability every pulse primitive implements: given an ascending
//!   array of time points, return an array of samples of the same length. A primitive also declares
//!   its [`ReturnKind`] (boolean or float samples) and its [`Frame`] (whether it expects times
//!   relative to the pulse start or to the block origin).
//!
//! - [`Pulse`]: a waveform placed on a channel at start time `t0` for `duration` seconds. This is
//!   what gets inserted into a [`PulseBlock`](crate::block::PulseBlock).
//!
//! - [`DefaultPulse`]: the background waveform of a channel, used wherever no explicit pulse is
//!   defined.
//!
//! - [`Samples`]: the output of a waveform, either a boolean or a float array.
//!
//! ## Implemented primitives
//!
//! | Primitive   | Returns | Frame  | Value                                           |
//! |-------------|---------|--------|-------------------------------------------------|
//! | [`High`]    | bool    | global | `true`                                          |
//! | [`Low`]     | bool    | global | `false`                                         |
//! | [`Const`]   | float   | global | `value`                                         |
//! | [`Sin`]     | float   | global | `amplitude * sin(2π·freq·t + phase) + offset`   |
//! | [`LinRamp`] | float   | local  | `start + (end - start) * t / duration`          |
//!
//! New primitives are added by implementing [`Waveform`]; nothing in the block or the sampler
//! branches on the concrete type.
//!
//! ## Sharing
//!
//! Waveforms are pure functions of time, so a [`Pulse`] holds its waveform behind an [`Arc`].
//! Cloning a pulse (and therefore a whole block) copies only the timing data.

use std::any::Any;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};

use crate::error::*;

/// Type of the samples produced by a waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Bool,
    Float,
}
impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ReturnKind::Bool => "bool",
                ReturnKind::Float => "float",
            }
        )
    }
}

/// Time frame in which a waveform expects its time points.
///
/// - `Global`: times are measured from the block origin.
/// - `Local`: times are measured from the start of the pulse (`t - t0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Global,
    Local,
}
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Frame::Global => "global",
                Frame::Local => "local",
            }
        )
    }
}

/// Array of samples produced by a waveform or by the sampler.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    Bool(Array1<bool>),
    Float(Array1<f64>),
}

impl Samples {
    pub fn kind(&self) -> ReturnKind {
        match self {
            Samples::Bool(_) => ReturnKind::Bool,
            Samples::Float(_) => ReturnKind::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::Bool(arr) => arr.len(),
            Samples::Float(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bool(&self) -> Option<&Array1<bool>> {
        match self {
            Samples::Bool(arr) => Some(arr),
            Samples::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&Array1<f64>> {
        match self {
            Samples::Float(arr) => Some(arr),
            Samples::Bool(_) => None,
        }
    }

    /// Converts to a float array, mapping `true`/`false` to `1.0`/`0.0`.
    /// Handy for drivers that write every channel as analogue data.
    pub fn to_f64(&self) -> Array1<f64> {
        match self {
            Samples::Bool(arr) => arr.mapv(|b| if b { 1. } else { 0. }),
            Samples::Float(arr) => arr.clone(),
        }
    }

    /// Overwrites `self[start..start + values.len()]` with `values`.
    ///
    /// Both arrays must hold the same kind of samples and the range must fit into `self`.
    pub fn assign_at(&mut self, start: usize, values: &Samples) -> Result<()> {
        let end = start + values.len();
        if end > self.len() {
            return Err(Error::invalid(format!(
                "cannot write {} samples at index {} into an array of length {}",
                values.len(),
                start,
                self.len()
            )));
        }
        match (self, values) {
            (Samples::Bool(dst), Samples::Bool(src)) => {
                dst.slice_mut(ndarray::s![start..end]).assign(src);
            }
            (Samples::Float(dst), Samples::Float(src)) => {
                dst.slice_mut(ndarray::s![start..end]).assign(src);
            }
            (dst, src) => {
                return Err(Error::invalid(format!(
                    "cannot write {} samples into a {} array",
                    src.kind(),
                    dst.kind()
                )))
            }
        }
        Ok(())
    }
}

/// Finds the first point of `t_arr` that is not a valid time: non-finite, negative, or smaller
/// than its predecessor. Returns the point together with the reason.
fn find_invalid_time(t_arr: ArrayView1<f64>) -> Option<(f64, &'static str)> {
    let mut prev = f64::NEG_INFINITY;
    for &t in t_arr.iter() {
        if !t.is_finite() {
            return Some((t, "not finite"));
        }
        if t < 0. {
            return Some((t, "negative"));
        }
        if t < prev {
            return Some((t, "time points are not ascending"));
        }
        prev = t;
    }
    None
}

/// The single capability shared by all pulse primitives.
///
/// Implementations must be pure: the same time array always yields the same samples.
///
/// # Implementing a new primitive
///
/// ```
/// use std::any::Any;
/// use std::fmt;
/// use ndarray::ArrayView1;
/// use pulseblock_backend::pulse::*;
///
/// /// Square wave toggling every `half_period` seconds.
/// #[derive(Debug, PartialEq)]
/// struct Square {
///     half_period: f64,
/// }
/// impl fmt::Display for Square {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "Square(half_period={:.2e})", self.half_period)
///     }
/// }
/// impl Waveform for Square {
///     fn return_kind(&self) -> ReturnKind {
///         ReturnKind::Bool
///     }
///     fn frame(&self) -> Frame {
///         Frame::Local
///     }
///     fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
///         Samples::Bool(t_arr.mapv(|t| ((t / self.half_period) as u64) % 2 == 0))
///     }
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
///     fn dyn_eq(&self, other: &dyn Waveform) -> bool {
///         other.as_any().downcast_ref::<Self>() == Some(self)
///     }
/// }
///
/// let pulse = Pulse::new("clk", 0., 4e-6, Square { half_period: 1e-6 });
/// let t = ndarray::array![0., 1.5e-6, 2.5e-6];
/// let samples = pulse.waveform.value_at(t.view()).unwrap();
/// assert_eq!(samples.as_bool().unwrap().to_vec(), vec![true, false, true]);
/// ```
pub trait Waveform: fmt::Debug + fmt::Display + Send + Sync {
    fn return_kind(&self) -> ReturnKind;
    fn frame(&self) -> Frame;

    /// Evaluates the waveform without checking the time array.
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples;

    /// Evaluates the waveform at every point of `t_arr`, given in this waveform's [`Frame`].
    ///
    /// Fails with a domain error if `t_arr` contains negative, non-finite or descending points.
    fn value_at(&self, t_arr: ArrayView1<f64>) -> Result<Samples> {
        if let Some((time, reason)) = find_invalid_time(t_arr) {
            return Err(Error::InvalidTime {
                waveform: self.to_string(),
                frame: self.frame().to_string(),
                time,
                reason,
            });
        }
        Ok(self.eval(t_arr))
    }

    fn as_any(&self) -> &dyn Any;

    /// Value equality across trait objects; used to detect conflicting default pulses.
    fn dyn_eq(&self, other: &dyn Waveform) -> bool;
}

impl PartialEq for dyn Waveform {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

/// Digital high: `true` everywhere.
#[derive(Clone, Debug, PartialEq)]
pub struct High;

/// Digital low: `false` everywhere.
#[derive(Clone, Debug, PartialEq)]
pub struct Low;

/// Constant float value.
#[derive(Clone, Debug, PartialEq)]
pub struct Const {
    pub value: f64,
}

/// Sinusoid `amplitude * sin(2π·freq·t + phase) + offset`, evaluated on block (global) time so
/// that consecutive sine pulses stay phase-coherent.
#[derive(Clone, Debug, PartialEq)]
pub struct Sin {
    pub amplitude: f64,
    pub freq: f64,
    /// Phase in radians
    pub phase: f64,
    pub offset: f64,
}

/// Linear ramp from `start` at the pulse start to `end` after `duration` seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct LinRamp {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl fmt::Display for High {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "High")
    }
}
impl fmt::Display for Low {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Low")
    }
}
impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Const(val={})", self.value)
    }
}
impl fmt::Display for Sin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Sin(amp={:.2e} freq={:.2e} ph={:.2} offset={:.2e})",
            self.amplitude, self.freq, self.phase, self.offset
        )
    }
}
impl fmt::Display for LinRamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LinRamp(start={} end={} dur={:.2e})",
            self.start, self.end, self.duration
        )
    }
}

impl Waveform for High {
    fn return_kind(&self) -> ReturnKind {
        ReturnKind::Bool
    }
    fn frame(&self) -> Frame {
        Frame::Global
    }
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
        Samples::Bool(Array1::from_elem(t_arr.len(), true))
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn dyn_eq(&self, other: &dyn Waveform) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

impl Waveform for Low {
    fn return_kind(&self) -> ReturnKind {
        ReturnKind::Bool
    }
    fn frame(&self) -> Frame {
        Frame::Global
    }
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
        Samples::Bool(Array1::from_elem(t_arr.len(), false))
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn dyn_eq(&self, other: &dyn Waveform) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

impl Waveform for Const {
    fn return_kind(&self) -> ReturnKind {
        ReturnKind::Float
    }
    fn frame(&self) -> Frame {
        Frame::Global
    }
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
        Samples::Float(Array1::from_elem(t_arr.len(), self.value))
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn dyn_eq(&self, other: &dyn Waveform) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

impl Waveform for Sin {
    fn return_kind(&self) -> ReturnKind {
        ReturnKind::Float
    }
    fn frame(&self) -> Frame {
        Frame::Global
    }
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
        Samples::Float(
            t_arr.mapv(|t| (2.0 * PI * self.freq * t + self.phase).sin() * self.amplitude + self.offset),
        )
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn dyn_eq(&self, other: &dyn Waveform) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

impl Waveform for LinRamp {
    fn return_kind(&self) -> ReturnKind {
        ReturnKind::Float
    }
    fn frame(&self) -> Frame {
        Frame::Local
    }
    fn eval(&self, t_arr: ArrayView1<f64>) -> Samples {
        if self.duration <= 0. {
            return Samples::Float(Array1::from_elem(t_arr.len(), self.start));
        }
        let slope = (self.end - self.start) / self.duration;
        Samples::Float(t_arr.mapv(|t| self.start + slope * t.min(self.duration)))
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn dyn_eq(&self, other: &dyn Waveform) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

/// A waveform placed on `channel`, starting at `t0` and lasting `duration` seconds.
///
/// `t0` may be negative while a sequence is being assembled; [`PulseBlock`] shifts its time origin
/// so that every stored pulse starts at `t0 >= 0`.
///
/// [`PulseBlock`]: crate::block::PulseBlock
#[derive(Clone, Debug)]
pub struct Pulse {
    pub channel: String,
    pub t0: f64,
    pub duration: f64,
    pub waveform: Arc<dyn Waveform>,
}

impl Pulse {
    /// Places an arbitrary waveform.
    ///
    /// # Examples
    /// ```
    /// use pulseblock_backend::pulse::*;
    /// let pulse = Pulse::new("aom", 1e-6, 2e-6, High);
    /// assert_eq!(pulse.right_edge(), 3e-6);
    /// ```
    pub fn new(channel: &str, t0: f64, duration: f64, waveform: impl Waveform + 'static) -> Self {
        Self::from_arc(channel, t0, duration, Arc::new(waveform))
    }

    pub fn from_arc(channel: &str, t0: f64, duration: f64, waveform: Arc<dyn Waveform>) -> Self {
        Pulse {
            channel: channel.to_string(),
            t0,
            duration,
            waveform,
        }
    }

    pub fn high(channel: &str, t0: f64, duration: f64) -> Self {
        Self::new(channel, t0, duration, High)
    }

    pub fn low(channel: &str, t0: f64, duration: f64) -> Self {
        Self::new(channel, t0, duration, Low)
    }

    pub fn constant(channel: &str, t0: f64, duration: f64, value: f64) -> Self {
        Self::new(channel, t0, duration, Const { value })
    }

    /// Sine pulse. Unspecified `dc_offset` defaults to `0.0`.
    pub fn sin(
        channel: &str,
        t0: f64,
        duration: f64,
        amplitude: f64,
        freq: f64,
        phase: f64,
        dc_offset: Option<f64>,
    ) -> Self {
        Self::new(
            channel,
            t0,
            duration,
            Sin {
                amplitude,
                freq,
                phase,
                offset: dc_offset.unwrap_or(0.),
            },
        )
    }

    pub fn linramp(channel: &str, t0: f64, duration: f64, start: f64, end: f64) -> Self {
        Self::new(channel, t0, duration, LinRamp { start, end, duration })
    }

    pub fn right_edge(&self) -> f64 {
        self.t0 + self.duration
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.waveform.return_kind()
    }

    /// Evaluates the pulse on block (global) times `t_arr`, converting them into the
    /// waveform's frame first.
    ///
    /// In the local frame, times before `t0` evaluate as `t0` itself: the first grid point of an
    /// off-grid pulse may sit a fraction of a step before its start.
    pub fn value_at(&self, t_arr: ArrayView1<f64>) -> Result<Samples> {
        match self.waveform.frame() {
            Frame::Global => self.waveform.value_at(t_arr),
            Frame::Local => {
                let local = t_arr.mapv(|t| (t - self.t0).max(0.));
                self.waveform.value_at(local.view())
            }
        }
    }

    /// Checks timing attributes before the pulse enters a block.
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.t0.is_finite() {
            return Err(Error::invalid(format!(
                "pulse {} on channel \"{}\" has non-finite t0={}",
                self.waveform, self.channel, self.t0
            )));
        }
        if !self.duration.is_finite() || self.duration < 0. {
            return Err(Error::invalid(format!(
                "pulse {} on channel \"{}\" has invalid duration {} (must be finite and >= 0)",
                self.waveform, self.channel, self.duration
            )));
        }
        Ok(())
    }

    /// Whether `self` and `other` share some time. Touching edges do not count as overlap.
    pub fn overlaps(&self, other: &Pulse) -> bool {
        self.t0 < other.right_edge() && other.t0 < self.right_edge()
    }
}

impl PartialEq for Pulse {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.t0 == other.t0
            && self.duration == other.duration
            && *self.waveform == *other.waveform
    }
}

impl fmt::Display for Pulse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, t0={:.2e}, dur={:.2e}",
            self.waveform, self.t0, self.duration
        )
    }
}

/// The background (idle) waveform of a channel.
///
/// A default pulse has no timing of its own: it implicitly covers the full block duration and is
/// evaluated on block time (local-frame waveforms see the same times, since the block starts at 0).
#[derive(Clone, Debug)]
pub struct DefaultPulse(pub Arc<dyn Waveform>);

impl DefaultPulse {
    pub fn new(waveform: impl Waveform + 'static) -> Self {
        DefaultPulse(Arc::new(waveform))
    }

    pub fn high() -> Self {
        Self::new(High)
    }

    pub fn low() -> Self {
        Self::new(Low)
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Const { value })
    }

    pub fn waveform(&self) -> &dyn Waveform {
        self.0.as_ref()
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.0.return_kind()
    }

    pub fn value_at(&self, t_arr: ArrayView1<f64>) -> Result<Samples> {
        self.0.value_at(t_arr)
    }
}

impl PartialEq for DefaultPulse {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl fmt::Display for DefaultPulse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn digital_values() {
        let t = array![0., 1., 2.];
        assert_eq!(
            High.value_at(t.view()).unwrap(),
            Samples::Bool(array![true, true, true])
        );
        assert_eq!(
            Low.value_at(t.view()).unwrap(),
            Samples::Bool(array![false, false, false])
        );
        assert_eq!(High.return_kind(), ReturnKind::Bool);
    }

    #[test]
    fn sine_values() {
        let sin = Sin {
            amplitude: 2.,
            freq: 1.,
            phase: 0.,
            offset: 0.5,
        };
        let t = array![0., 0.25, 0.5];
        let values = sin.value_at(t.view()).unwrap();
        let values = values.as_float().unwrap();
        assert_abs_diff_eq!(values[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(values[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn linramp_uses_local_time() {
        let pulse = Pulse::linramp("ao0", 10., 2., 0., 4.);
        let t = array![10., 11., 12.];
        let values = pulse.value_at(t.view()).unwrap();
        assert_eq!(values, Samples::Float(array![0., 2., 4.]));

        // Times before the pulse start hold the start value
        let values = pulse.value_at(array![9.5, 10.5].view()).unwrap();
        assert_eq!(values, Samples::Float(array![0., 1.]));
    }

    #[test]
    fn rejects_bad_time_arrays() {
        let err = High.value_at(array![-1e-9, 0.].view()).unwrap_err();
        assert!(matches!(err, Error::InvalidTime { reason: "negative", .. }));
        let err = Const { value: 1. }
            .value_at(array![0., f64::NAN].view())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTime { reason: "not finite", .. }));
        let err = High.value_at(array![2., 1.].view()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn waveform_equality() {
        assert_eq!(DefaultPulse::low(), DefaultPulse::low());
        assert_ne!(DefaultPulse::low(), DefaultPulse::high());
        assert_eq!(DefaultPulse::constant(1.), DefaultPulse::constant(1.));
        assert_ne!(DefaultPulse::constant(1.), DefaultPulse::constant(2.));

        let a = Pulse::sin("mw", 0., 1e-6, 1., 2.5e9, 0., None);
        let mut b = a.clone();
        assert_eq!(a, b);
        b.t0 = 1e-6;
        assert_ne!(a, b);
    }

    #[test]
    fn touching_pulses_do_not_overlap() {
        let a = Pulse::high("ch", 0., 10.);
        assert!(!a.overlaps(&Pulse::high("ch", 10., 5.)));
        assert!(a.overlaps(&Pulse::low("ch", 9.5, 5.)));
        assert!(a.overlaps(&Pulse::low("ch", 2., 1.)));
    }

    #[test]
    fn assign_at_checks_kind_and_range() {
        let mut dst = Samples::Bool(Array1::from_elem(4, false));
        dst.assign_at(1, &Samples::Bool(array![true, true])).unwrap();
        assert_eq!(dst, Samples::Bool(array![false, true, true, false]));
        assert!(dst.assign_at(3, &Samples::Bool(array![true, true])).is_err());
        assert!(dst.assign_at(0, &Samples::Float(array![1.])).is_err());
        assert_eq!(dst.to_f64(), array![0., 1., 1., 0.]);
    }
}
