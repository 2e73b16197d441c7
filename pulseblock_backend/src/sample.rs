//! Rasterizes a [`PulseBlock`] into fixed-rate sample arrays.
//!
//! The sampler converts the sparse interval representation into one dense array per channel,
//! honoring the length constraints of the target hardware ([`HardwareConstraints`]):
//!
//! 1. `t_step = 1 / samp_rate` and `n_pts = floor(duration / t_step) + 1`.
//! 2. If `n_pts` is not a multiple of `len_step`, it is rounded up (auto-adjust) or rejected.
//!    Added trailing points hold the channel default.
//! 3. `n_pts` must lie within `[len_min, len_max]`.
//! 4. Every channel is filled with its default pulse; each explicit pulse then overwrites the
//!    grid-index range `[floor(t0 / t_step), floor((t0 + duration) / t_step)]` (inclusive).
//!
//! Sampling is a pure function of `(block, samp_rate, constraints)`: the block is not modified and
//! repeated calls give identical results.

use indexmap::IndexMap;
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::block::PulseBlock;
use crate::error::*;
use crate::pulse::*;
use crate::utils::*;

/// Waveform length limits of an output device, in samples.
///
/// # Examples
/// Limits can be read from a device configuration file; missing fields take their defaults:
/// ```
/// # use pulseblock_backend::HardwareConstraints;
/// let hw: HardwareConstraints = serde_json::from_str(r#"{"len_min": 32, "len_step": 16}"#).unwrap();
/// assert_eq!(hw.len_max, usize::MAX);
/// assert!(hw.auto_adjust);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConstraints {
    /// Minimal number of points
    pub len_min: usize,
    /// Maximal number of points
    pub len_max: usize,
    /// The number of points must be an integer multiple of `len_step`
    pub len_step: usize,
    /// Pad the waveform with default values up to the next multiple of `len_step`
    pub auto_adjust: bool,
}

impl Default for HardwareConstraints {
    fn default() -> Self {
        HardwareConstraints {
            len_min: 0,
            len_max: usize::MAX,
            len_step: 1,
            auto_adjust: true,
        }
    }
}

impl HardwareConstraints {
    pub fn validate(&self) -> Result<()> {
        if self.len_step == 0 {
            return Err(Error::invalid("HardwareConstraints: len_step must be at least 1"));
        }
        if self.len_min > self.len_max {
            return Err(Error::invalid(format!(
                "HardwareConstraints: len_min={} exceeds len_max={}",
                self.len_min, self.len_max
            )));
        }
        Ok(())
    }
}

/// Output of [`sample`].
#[derive(Clone, Debug, PartialEq)]
pub struct SampledBlock {
    /// One array of `n_pts` samples per channel, in the block's default-pulse order
    pub samples: IndexMap<String, Samples>,
    /// Final number of points, including padding
    pub n_pts: usize,
    /// Number of trailing points added to meet `len_step`
    pub add_pts: usize,
    /// The time grid the samples were taken on
    pub t_arr: Array1<f64>,
}

/// Samples `block` at `samp_rate` (Hz) under the hardware `constraints`.
///
/// # Errors
/// - `Domain`: non-positive sample rate, invalid constraints, a channel with pulses but no
///   default, or a pulse whose return kind differs from its channel default.
/// - `HardwareConstraint`: `n_pts` is not a multiple of `len_step` with auto-adjust off, or lies
///   outside `[len_min, len_max]`.
///
/// # Examples
/// ```
/// # use pulseblock_backend::*;
/// let mut pb = PulseBlock::with_defaults(vec![("ch1".to_string(), DefaultPulse::low())], "");
/// pb.insert(Pulse::high("ch1", 0., 10e-9), true).unwrap();
/// pb.insert(Pulse::high("ch1", 20e-9, 10e-9), true).unwrap();
///
/// let res = sample(&pb, 1e9, &HardwareConstraints::default()).unwrap();
/// assert_eq!(res.n_pts, 31);
/// let ch1 = res.samples["ch1"].as_bool().unwrap();
/// assert!(ch1[10] && !ch1[11] && !ch1[19] && ch1[20] && ch1[30]);
/// ```
pub fn sample(
    block: &PulseBlock,
    samp_rate: f64,
    constraints: &HardwareConstraints,
) -> Result<SampledBlock> {
    let mut timer = TickTimer::new();
    if !samp_rate.is_finite() || samp_rate <= 0. {
        return Err(Error::invalid(format!(
            "sample(): sampling rate must be finite and positive, got {}",
            samp_rate
        )));
    }
    constraints.validate()?;
    block.check_defaults()?;

    let t_step = 1. / samp_rate;
    let raw_pts = floor_steps(block.duration(), t_step)
        .and_then(|steps| steps.checked_add(1))
        .ok_or(Error::LengthAboveMax {
            n_pts: usize::MAX,
            len_max: constraints.len_max,
        })?;
    let (n_pts, add_pts) = adjust_length(raw_pts, constraints)?;
    if add_pts > 0 {
        log::warn!(
            "sample(): block \"{}\": appended {} default points to meet len_step={} ({} -> {} points)",
            block.name(),
            add_pts,
            constraints.len_step,
            raw_pts,
            n_pts
        );
    }

    let t_arr = time_grid(n_pts, t_step);
    let mut samples = IndexMap::new();
    for (ch, default) in block.defaults_by_channel() {
        let mut ch_samples = default.value_at(t_arr.view())?;
        for pulse in block.pulses(ch).unwrap_or_default() {
            overwrite_pulse(&mut ch_samples, pulse, &t_arr, t_step)?;
        }
        samples.insert(ch.clone(), ch_samples);
    }

    log::info!(
        "sample(): block \"{}\": {} channels, n_pts={}, add_pts={}",
        block.name(),
        samples.len(),
        n_pts,
        add_pts
    );
    timer.tick_log("sample()");
    Ok(SampledBlock {
        samples,
        n_pts,
        add_pts,
        t_arr,
    })
}

/// Applies the step alignment and the bounds of `constraints` to a raw point count.
/// Returns the final point count and the number of added points.
pub fn adjust_length(n_pts: usize, constraints: &HardwareConstraints) -> Result<(usize, usize)> {
    constraints.validate()?;
    let mut add_pts = 0;
    let mut n_pts = n_pts;
    if n_pts % constraints.len_step != 0 {
        if !constraints.auto_adjust {
            return Err(Error::LengthStep {
                n_pts,
                len_step: constraints.len_step,
            });
        }
        let adjusted = n_pts
            .checked_next_multiple_of(constraints.len_step)
            .ok_or(Error::LengthAboveMax {
                n_pts,
                len_max: constraints.len_max,
            })?;
        add_pts = adjusted - n_pts;
        n_pts = adjusted;
    }
    if n_pts < constraints.len_min {
        return Err(Error::LengthBelowMin {
            n_pts,
            len_min: constraints.len_min,
        });
    }
    if n_pts > constraints.len_max {
        return Err(Error::LengthAboveMax {
            n_pts,
            len_max: constraints.len_max,
        });
    }
    Ok((n_pts, add_pts))
}

// Evaluates `pulse` on its grid-index range and writes the values over the default fill
fn overwrite_pulse(
    ch_samples: &mut Samples,
    pulse: &Pulse,
    t_arr: &Array1<f64>,
    t_step: f64,
) -> Result<()> {
    let last_idx = match t_arr.len().checked_sub(1) {
        Some(last_idx) => last_idx,
        None => return Ok(()),
    };
    let start_idx = match floor_steps(pulse.t0, t_step) {
        Some(start_idx) if start_idx <= last_idx => start_idx,
        _ => return Ok(()),
    };
    let stop_idx = floor_steps(pulse.right_edge(), t_step)
        .unwrap_or(last_idx)
        .min(last_idx);
    let values = pulse.value_at(t_arr.slice(s![start_idx..=stop_idx]))?;
    ch_samples.assign_at(start_idx, &values)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn digital_block() -> PulseBlock {
        let mut pb = PulseBlock::with_defaults(vec![("ch1".to_string(), DefaultPulse::low())], "dig");
        pb.insert(Pulse::high("ch1", 0., 10e-9), true).unwrap();
        pb.insert(Pulse::high("ch1", 20e-9, 10e-9), true).unwrap();
        pb
    }

    #[test]
    fn two_pulse_scenario() {
        let res = sample(&digital_block(), 1e9, &HardwareConstraints::default()).unwrap();
        assert_eq!(res.n_pts, 31);
        assert_eq!(res.add_pts, 0);
        let ch1 = res.samples["ch1"].as_bool().unwrap();
        for (idx, &val) in ch1.iter().enumerate() {
            let expected = idx <= 10 || idx >= 20;
            assert_eq!(val, expected, "index {}", idx);
        }
    }

    #[rstest]
    #[case(1, 31, 0)]
    #[case(8, 32, 1)]
    #[case(16, 32, 1)]
    #[case(31, 31, 0)]
    #[case(64, 64, 33)]
    fn step_padding(#[case] len_step: usize, #[case] n_pts: usize, #[case] add_pts: usize) {
        let hw = HardwareConstraints {
            len_step,
            ..Default::default()
        };
        let res = sample(&digital_block(), 1e9, &hw).unwrap();
        assert_eq!((res.n_pts, res.add_pts), (n_pts, add_pts));
        // Padding holds the default value
        let ch1 = res.samples["ch1"].as_bool().unwrap();
        assert!(ch1.iter().skip(31).all(|&v| !v));
    }

    #[rstest]
    #[case(HardwareConstraints { len_step: 8, auto_adjust: false, ..Default::default() })]
    #[case(HardwareConstraints { len_min: 32, ..Default::default() })]
    #[case(HardwareConstraints { len_max: 30, ..Default::default() })]
    fn constraint_violations(#[case] hw: HardwareConstraints) {
        let err = sample(&digital_block(), 1e9, &hw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareConstraint);
    }

    #[test]
    fn bound_errors_name_the_bound() {
        let hw = HardwareConstraints {
            len_max: 30,
            ..Default::default()
        };
        let err = sample(&digital_block(), 1e9, &hw).unwrap_err();
        assert_eq!(
            err,
            Error::LengthAboveMax {
                n_pts: 31,
                len_max: 30
            }
        );
    }

    #[rstest]
    #[case(0.)]
    #[case(-1e9)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn rejects_bad_sample_rate(#[case] samp_rate: f64) {
        let err = sample(&digital_block(), samp_rate, &HardwareConstraints::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn rejects_mixed_return_kinds() {
        let mut pb = PulseBlock::with_defaults(vec![("ao".to_string(), DefaultPulse::low())], "");
        pb.insert(Pulse::constant("ao", 0., 1., 0.5), true).unwrap();
        let err = sample(&pb, 10., &HardwareConstraints::default()).unwrap_err();
        assert!(matches!(err, Error::ReturnKindMismatch { .. }));
    }

    #[test]
    fn analog_channels() {
        let mut pb = PulseBlock::with_defaults(
            vec![
                ("ramp".to_string(), DefaultPulse::constant(-1.)),
                ("idle".to_string(), DefaultPulse::constant(0.25)),
            ],
            "ana",
        );
        pb.insert(Pulse::linramp("ramp", 2., 4., 0., 8.), true).unwrap();
        let res = sample(&pb, 1., &HardwareConstraints::default()).unwrap();

        assert_eq!(res.n_pts, 7);
        let ramp = res.samples["ramp"].as_float().unwrap();
        let expected = [-1., -1., 0., 2., 4., 6., 8.];
        for (val, exp) in ramp.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*val, *exp, epsilon = 1e-12);
        }
        // Default-only channels are sampled too
        assert!(res.samples["idle"].as_float().unwrap().iter().all(|&v| v == 0.25));
        assert_abs_diff_eq!(res.t_arr[6], 6., epsilon = 1e-12);
    }

    #[test]
    fn off_grid_ramp_starts_at_its_start_value() {
        let mut pb = PulseBlock::with_defaults(vec![("ramp".to_string(), DefaultPulse::constant(-1.))], "");
        pb.insert(Pulse::linramp("ramp", 2.5, 4., 0., 8.), true).unwrap();
        let res = sample(&pb, 1., &HardwareConstraints::default()).unwrap();

        assert_eq!(res.n_pts, 7);
        // Grid point 2 sits half a step before t0
        let ramp = res.samples["ramp"].as_float().unwrap();
        let expected = [-1., -1., 0., 1., 3., 5., 7.];
        for (val, exp) in ramp.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*val, *exp, epsilon = 1e-12);
        }
    }

    #[test]
    fn point_count_out_of_range() {
        let mut pb = PulseBlock::with_defaults(vec![("ch1".to_string(), DefaultPulse::low())], "");
        pb.insert(Pulse::high("ch1", 0., 1e20), true).unwrap();
        let hw = HardwareConstraints {
            len_max: 1000,
            ..Default::default()
        };
        let err = sample(&pb, 1., &hw).unwrap_err();
        assert!(matches!(err, Error::LengthAboveMax { len_max: 1000, .. }));
        assert_eq!(err.kind(), ErrorKind::HardwareConstraint);

        // Rounding up to len_step must not wrap around either
        let stepped = HardwareConstraints {
            len_step: 1 << 20,
            ..Default::default()
        };
        let err = adjust_length(usize::MAX - 1, &stepped).unwrap_err();
        assert!(matches!(err, Error::LengthAboveMax { .. }));
    }

    #[test]
    fn sampling_is_pure() {
        let pb = digital_block();
        let snapshot = pb.clone();
        let hw = HardwareConstraints {
            len_step: 4,
            ..Default::default()
        };
        let first = sample(&pb, 1e9, &hw).unwrap();
        let second = sample(&pb, 1e9, &hw).unwrap();
        assert_eq!(first, second);
        assert_eq!(pb, snapshot);
    }

    #[test]
    fn constraints_from_json() {
        let hw: HardwareConstraints = serde_json::from_str(r#"{"len_step": 64}"#).unwrap();
        assert_eq!(
            hw,
            HardwareConstraints {
                len_step: 64,
                ..Default::default()
            }
        );
        let text = serde_json::to_string(&hw).unwrap();
        let back: HardwareConstraints = serde_json::from_str(&text).unwrap();
        assert_eq!(back, hw);

        let bad = HardwareConstraints {
            len_step: 0,
            ..Default::default()
        };
        assert!(adjust_length(10, &bad).is_err());
    }
}
