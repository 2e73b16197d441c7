//! Collapses long idle stretches of a [`PulseBlock`] into repetitions of a short wait block.
//!
//! Sequencer memory is usually much smaller than the total length of a sampled experiment, while
//! most of the time all channels sit at their default values. [`zip`] splits the block into
//! quanta of `dur_quant`:
//!
//! - a quantum touched by any pulse is "in use"; adjacent in-use quanta are cut out of the block
//!   as one snippet;
//! - a run of idle quanta is replaced by `n` repetitions of a single `dur_quant`-long wait block;
//! - the last whole quantum is always in use and absorbs the remainder shorter than `dur_quant`,
//!   since such a short remainder cannot be played on its own.
//!
//! [`expand`] performs the reverse operation and is mostly useful for checking a zipped sequence.

use std::collections::HashMap;

use crate::block::PulseBlock;
use crate::error::*;
use crate::pulse::*;
use crate::utils::*;

/// A run of identical values found by [`run_len_encode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run<T> {
    pub start: usize,
    pub len: usize,
    pub value: T,
}

/// Result of [`zip`].
#[derive(Clone, Debug, PartialEq)]
pub struct ZippedBlock {
    /// Chronological play list: snippet name and number of repetitions
    pub seq: Vec<(String, usize)>,
    /// All distinct snippets. The wait block (if any) comes first.
    pub snippets: Vec<PulseBlock>,
}

impl ZippedBlock {
    pub fn snippet(&self, name: &str) -> Option<&PulseBlock> {
        self.snippets.iter().find(|pb| pb.name() == name)
    }
}

/// Merges overlapping (or touching) `(start, stop)` intervals.
///
/// The input may be unordered; the output is sorted and pairwise disjoint.
pub fn merge_intervals(intervals: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
    for (start, stop) in sorted {
        match merged.last_mut() {
            Some(last) if last.1 >= start => last.1 = last.1.max(stop),
            _ => merged.push((start, stop)),
        }
    }
    merged
}

/// Run-length encodes `values`.
///
/// # Examples
/// ```
/// # use pulseblock_backend::zip::*;
/// let runs = run_len_encode(&[true, true, false, true]);
/// assert_eq!(runs.len(), 3);
/// assert_eq!((runs[1].start, runs[1].len, runs[1].value), (2, 1, false));
/// ```
pub fn run_len_encode<T: PartialEq + Copy>(values: &[T]) -> Vec<Run<T>> {
    let mut runs: Vec<Run<T>> = Vec::new();
    for (idx, &value) in values.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.value == value => run.len += 1,
            _ => runs.push(Run {
                start: idx,
                len: 1,
                value,
            }),
        }
    }
    runs
}

/// Splits `block` into a wait block and pulse snippets, see the module documentation.
///
/// Snippets are named `<name>_wait` and `<name>_0`, `<name>_1`, ... in chronological order.
pub fn zip(block: &PulseBlock, dur_quant: f64) -> Result<ZippedBlock> {
    if !dur_quant.is_finite() || dur_quant <= 0. {
        return Err(Error::invalid(format!(
            "zip(): dur_quant must be finite and positive, got {}",
            dur_quant
        )));
    }
    let name = block.name();
    let quant_num = floor_steps(block.duration(), dur_quant).ok_or_else(|| {
        Error::invalid(format!(
            "zip(): block duration {} is too long for dur_quant={}",
            block.duration(),
            dur_quant
        ))
    })?;

    // Too short to collapse anything
    if quant_num == 0 {
        let whole = block.snip(0., block.duration(), &format!("{}_0", name), true)?;
        return Ok(ZippedBlock {
            seq: vec![(whole.name().to_string(), 1)],
            snippets: vec![whole],
        });
    }

    let intervals: Vec<(f64, f64)> = block
        .pulses_by_channel()
        .values()
        .flatten()
        .map(|p| (p.t0, p.right_edge()))
        .collect();

    let mut in_use = vec![false; quant_num];
    for (start, stop) in merge_intervals(&intervals) {
        // Everything from the last whole quantum on is in use anyway
        let left_idx = match floor_steps(start, dur_quant) {
            Some(left_idx) if left_idx < quant_num - 1 => left_idx,
            _ => continue,
        };
        let right_idx = floor_steps(stop, dur_quant)
            .unwrap_or(quant_num - 1)
            .min(quant_num - 1);
        for flag in in_use[left_idx..=right_idx].iter_mut() {
            *flag = true;
        }
    }
    in_use[quant_num - 1] = true;

    let wait_name = format!("{}_wait", name);
    let mut wait = PulseBlock::with_defaults(block.defaults_by_channel().clone(), &wait_name);
    wait.extend_duration(dur_quant)?;

    let runs = run_len_encode(&in_use);
    let mut seq = Vec::with_capacity(runs.len());
    let mut snippets = vec![wait];
    let last_run = runs.len() - 1;
    for (run_idx, run) in runs.iter().enumerate() {
        if !run.value {
            seq.push((wait_name.clone(), run.len));
            continue;
        }
        let snip_name = format!("{}_{}", name, snippets.len() - 1);
        let start_t = run.start as f64 * dur_quant;
        let stop_t = if run_idx == last_run {
            block.duration()
        } else {
            (run.start + run.len) as f64 * dur_quant
        };
        let snippet = block.snip(start_t, stop_t, &snip_name, true)?;
        seq.push((snip_name, 1));
        snippets.push(snippet);
    }
    log::debug!(
        "zip(): block \"{}\" collapsed into {} snippets, {} sequence entries",
        name,
        snippets.len(),
        seq.len()
    );

    Ok(ZippedBlock { seq, snippets })
}

/// Rebuilds a plain block by appending every entry of `zipped.seq`.
///
/// With `indicate_bounds` set, every snippet boundary is marked by a zero-length `High` pulse on
/// the first channel of the snippet (inserted without the conflict check).
pub fn expand(zipped: &ZippedBlock, indicate_bounds: bool) -> Result<PulseBlock> {
    let by_name: HashMap<&str, &PulseBlock> = zipped
        .snippets
        .iter()
        .map(|pb| (pb.name(), pb))
        .collect();

    let mut new_pb = PulseBlock::default();
    for (snip_name, reps) in zipped.seq.iter() {
        let snippet = by_name.get(snip_name.as_str()).ok_or_else(|| {
            Error::invalid(format!(
                "expand(): sequence refers to unknown snippet \"{}\"",
                snip_name
            ))
        })?;
        for _ in 0..*reps {
            new_pb.append_block(snippet, 0., true)?;
            if indicate_bounds {
                if let Some(mrk_ch) = snippet.channels().first() {
                    new_pb.append(Pulse::high(mrk_ch, 0., 0.), false)?;
                }
            }
        }
    }
    Ok(new_pb)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sparse_block() -> PulseBlock {
        let mut pb = PulseBlock::with_defaults(
            vec![
                ("a".to_string(), DefaultPulse::low()),
                ("b".to_string(), DefaultPulse::low()),
            ],
            "exp",
        );
        pb.insert(Pulse::high("a", 1., 2.), true).unwrap();
        pb.insert(Pulse::high("b", 2.5, 1.), true).unwrap();
        pb.insert(Pulse::high("a", 10.5, 1.), true).unwrap();
        pb.extend_duration(20.5).unwrap();
        pb
    }

    #[test]
    fn merges_unordered_intervals() {
        let merged = merge_intervals(&[(5., 6.), (0., 1.), (0.5, 2.), (2., 3.), (8., 9.)]);
        assert_eq!(merged, vec![(0., 3.), (5., 6.), (8., 9.)]);
        assert!(merge_intervals(&[]).is_empty());
    }

    #[test]
    fn run_lengths() {
        let runs = run_len_encode(&[1, 1, 1, 2, 2, 1]);
        let flat: Vec<(usize, usize, i32)> = runs.iter().map(|r| (r.start, r.len, r.value)).collect();
        assert_eq!(flat, vec![(0, 3, 1), (3, 2, 2), (5, 1, 1)]);
        assert!(run_len_encode::<bool>(&[]).is_empty());
    }

    #[test]
    fn zip_sequence() {
        let zipped = zip(&sparse_block(), 2.).unwrap();
        // In use: quanta 0-1 (pulses within 1..3.5), 5 (10.5..11.5) and the last one, 9
        assert_eq!(
            zipped.seq,
            vec![
                ("exp_0".to_string(), 1),
                ("exp_wait".to_string(), 3),
                ("exp_1".to_string(), 1),
                ("exp_wait".to_string(), 3),
                ("exp_2".to_string(), 1),
            ]
        );
        assert_eq!(zipped.snippets[0].name(), "exp_wait");
        assert_eq!(zipped.snippets[0].duration(), 2.);
        assert!(zipped.snippets[0].is_empty());

        let first = zipped.snippet("exp_0").unwrap();
        assert_eq!(first.duration(), 4.);
        assert_eq!(first.pulses("a").unwrap()[0].t0, 1.);
        assert_eq!(first.pulses("b").unwrap()[0].t0, 2.5);

        let second = zipped.snippet("exp_1").unwrap();
        assert_eq!(second.duration(), 2.);
        assert_eq!(second.pulses("a").unwrap()[0].t0, 0.5);

        // The last snippet absorbs the remainder
        assert_abs_diff_eq!(zipped.snippet("exp_2").unwrap().duration(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn expand_restores_block() {
        let pb = sparse_block();
        let restored = expand(&zip(&pb, 2.).unwrap(), false).unwrap();
        assert_abs_diff_eq!(restored.duration(), pb.duration(), epsilon = 1e-9);
        for ch in ["a", "b"] {
            let orig = pb.pulses(ch).unwrap();
            let back = restored.pulses(ch).unwrap();
            assert_eq!(orig.len(), back.len());
            for (p, q) in orig.iter().zip(back.iter()) {
                assert_abs_diff_eq!(p.t0, q.t0, epsilon = 1e-9);
                assert_eq!(p.duration, q.duration);
            }
        }

        let marked = expand(&zip(&pb, 2.).unwrap(), true).unwrap();
        // 3 original pulses plus one marker per played snippet (1 + 3 + 1 + 3 + 1)
        assert_eq!(marked.pulses("a").unwrap().len(), 2 + 9);
    }

    #[test]
    fn short_block_is_single_snippet() {
        let mut pb = PulseBlock::with_defaults(vec![("a".to_string(), DefaultPulse::low())], "s");
        pb.insert(Pulse::high("a", 0., 1.), true).unwrap();
        let zipped = zip(&pb, 5.).unwrap();
        assert_eq!(zipped.seq, vec![("s_0".to_string(), 1)]);
        assert_eq!(zipped.snippets.len(), 1);

        assert!(zip(&pb, 0.).is_err());
    }

    #[test]
    fn quantum_count_out_of_range() {
        let mut pb = PulseBlock::with_defaults(vec![("a".to_string(), DefaultPulse::low())], "s");
        pb.insert(Pulse::high("a", 0., 1e20), true).unwrap();
        let err = zip(&pb, 1.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }
}
