//! Implements [`PulseBlock`], the ordered-interval container for multi-channel pulse sequences.
//!
//! A `PulseBlock` is essentially a set of "shelves" (channels); every explicit [`Pulse`] is a
//! "box" sitting on one shelf between `t0` and `t0 + duration`. Boxes on the same shelf never
//! overlap and are kept sorted by `t0`. The gaps between boxes are covered by the channel's
//! [`DefaultPulse`].
//!
//! ## Invariants
//!
//! After every successful operation:
//! - each channel with explicit pulses also has a default pulse;
//! - pulses on the same channel are sorted by `t0` and pairwise non-overlapping
//!   (`prev.t0 + prev.duration <= next.t0`), unless the caller explicitly disabled the conflict check;
//! - every pulse starts at `t0 >= 0`; inserting at a negative time moves the whole block to the
//!   right instead (see [`PulseBlock::shift_all`]);
//! - `duration` is at least the right edge of every pulse.
//!
//! ## Copy semantics
//!
//! Mutating operations (`insert`, `insert_block`, ...) take their operands by value or clone
//! them, so the caller's objects are never aliased. The `join*` variants leave the receiver
//! untouched and return a new block. Waveforms are shared behind an [`Arc`](std::sync::Arc), so
//! cloning a block only copies timing data.
//!
//! ## Example
//! ```
//! use pulseblock_backend::*;
//! use indexmap::IndexMap;
//!
//! let mut defaults = IndexMap::new();
//! defaults.insert("aom".to_string(), DefaultPulse::low());
//! let mut pb = PulseBlock::new(vec![], defaults, "readout").unwrap();
//!
//! pb.insert(Pulse::high("aom", 0., 10e-9), true).unwrap();
//! pb.insert(Pulse::high("aom", 20e-9, 10e-9), true).unwrap();
//! assert!((pb.duration() - 30e-9).abs() < 1e-18);
//!
//! // Overlapping pulses are rejected and leave the block untouched
//! assert!(pb.insert(Pulse::high("aom", 5e-9, 10e-9), true).is_err());
//! assert_eq!(pb.pulses("aom").unwrap().len(), 2);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;

use crate::error::*;
use crate::pulse::*;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct PulseBlock {
    name: String,
    duration: f64,
    pulses: IndexMap<String, Vec<Pulse>>,
    defaults: IndexMap<String, DefaultPulse>,
}

impl PulseBlock {
    /// Constructs a new `PulseBlock` from an initial list of pulses and default pulses.
    ///
    /// The pulse list is placed as a whole: the most negative `t0` across the batch is found
    /// first and every pulse is shifted by the same amount, so the relative positions given by
    /// the caller are preserved. Pulses are then inserted with the overlap check enabled.
    ///
    /// # Examples
    /// ```
    /// # use pulseblock_backend::*;
    /// use maplit::hashmap;
    ///
    /// let defaults = hashmap! {"ch1".to_string() => DefaultPulse::low()};
    /// let pb = PulseBlock::new(
    ///     vec![Pulse::high("ch1", -5e-9, 5e-9), Pulse::high("ch1", 0., 10e-9)],
    ///     defaults,
    ///     "",
    /// )
    /// .unwrap();
    /// let t0s: Vec<f64> = pb.pulses("ch1").unwrap().iter().map(|p| p.t0).collect();
    /// assert_eq!(t0s, vec![0., 5e-9]);
    /// ```
    pub fn new<D>(pulses: Vec<Pulse>, defaults: D, name: &str) -> Result<Self>
    where
        D: IntoIterator<Item = (String, DefaultPulse)>,
    {
        let mut pb = PulseBlock {
            name: name.to_string(),
            duration: 0.,
            pulses: IndexMap::new(),
            defaults: defaults.into_iter().collect(),
        };

        for pulse in pulses.iter() {
            pulse.validate()?;
        }
        let left_edge = pulses.iter().map(|p| p.t0).fold(0., f64::min);
        for mut pulse in pulses {
            pulse.t0 -= left_edge;
            pb.insert(pulse, true)?;
        }
        Ok(pb)
    }

    /// Empty block with the given default pulses.
    pub fn with_defaults<D>(defaults: D, name: &str) -> Self
    where
        D: IntoIterator<Item = (String, DefaultPulse)>,
    {
        PulseBlock {
            name: name.to_string(),
            duration: 0.,
            pulses: IndexMap::new(),
            defaults: defaults.into_iter().collect(),
        }
    }

    // Field methods
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
    /// Total span of the block: at least the right-most edge across all channels.
    pub fn duration(&self) -> f64 {
        self.duration
    }
    /// Read-only view of all explicit pulses, keyed by channel.
    pub fn pulses_by_channel(&self) -> &IndexMap<String, Vec<Pulse>> {
        &self.pulses
    }
    /// Read-only view of the default pulses, keyed by channel.
    pub fn defaults_by_channel(&self) -> &IndexMap<String, DefaultPulse> {
        &self.defaults
    }
    /// Time-ordered pulses on `channel`, or `None` if the channel has no explicit pulses.
    pub fn pulses(&self, channel: &str) -> Option<&[Pulse]> {
        self.pulses.get(channel).map(|v| v.as_slice())
    }
    pub fn default_pulse(&self, channel: &str) -> Option<&DefaultPulse> {
        self.defaults.get(channel)
    }
    /// Names of all channels (with either explicit or default pulses), in registration order.
    pub fn channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.defaults.keys().map(|s| s.as_str()).collect();
        for ch in self.pulses.keys() {
            if !self.defaults.contains_key(ch) {
                names.push(ch);
            }
        }
        names
    }
    pub fn is_empty(&self) -> bool {
        self.pulses.values().all(|v| v.is_empty())
    }

    // No pulses and no span: nothing for a global shift to move
    fn is_blank(&self) -> bool {
        self.is_empty() && self.duration == 0.
    }

    /// Registers (or replaces) the default pulse of `channel`.
    pub fn set_default(&mut self, channel: &str, default: DefaultPulse) {
        self.defaults.insert(channel.to_string(), default);
    }

    /// Grows the block to `duration` without adding pulses, e.g. to build a pure wait block.
    ///
    /// Fails if `duration` is below the right-most pulse edge.
    pub fn extend_duration(&mut self, duration: f64) -> Result<()> {
        let right_edge = self.right_edge();
        if !duration.is_finite() || duration < right_edge {
            return Err(Error::invalid(format!(
                "extend_duration(): duration {:e} is invalid or below the right-most pulse edge {:e}",
                duration, right_edge
            )));
        }
        self.duration = duration;
        Ok(())
    }

    /// Shifts every pulse on every channel by `amount` and grows `duration` by the same amount.
    ///
    /// This is the global rightward shift performed automatically when a pulse or block is
    /// inserted at negative time: relative timing between all pulses is preserved and the block
    /// origin stays at 0.
    pub fn shift_all(&mut self, amount: f64) {
        if amount == 0. {
            return;
        }
        log::debug!(
            "PulseBlock \"{}\": shifting all pulses by {:e}",
            self.name,
            amount
        );
        for pulse in self.pulses.values_mut().flatten() {
            pulse.t0 += amount;
        }
        self.duration += amount;
    }

    // Checks `pulse` against its immediate neighbours on its channel
    fn check_overlap(&self, pulse: &Pulse) -> Result<()> {
        let p_list = match self.pulses.get(&pulse.channel) {
            Some(p_list) => p_list,
            None => return Ok(()),
        };
        // Binary search for the first pulse starting at or after the new one
        let idx = p_list.partition_point(|p| p.t0 < pulse.t0);

        if idx > 0 {
            let prev = &p_list[idx - 1];
            if prev.overlaps(pulse) {
                return Err(Error::PulseOverlap {
                    channel: pulse.channel.clone(),
                    side: Side::Left,
                    new: pulse.to_string(),
                    existing: prev.to_string(),
                });
            }
        }
        if idx < p_list.len() {
            let next = &p_list[idx];
            if pulse.overlaps(next) {
                return Err(Error::PulseOverlap {
                    channel: pulse.channel.clone(),
                    side: Side::Right,
                    new: pulse.to_string(),
                    existing: next.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Inserts a new pulse into the block.
    ///
    /// The insertion location is given by the pulse itself: `pulse.channel` selects the channel
    /// (registered on first use) and `pulse.t0` the start time relative to the block origin.
    /// If `t0` is negative, the pulse lands before the earliest pulse and the whole block is
    /// shifted right by `|t0|` (see [`PulseBlock::shift_all`]).
    ///
    /// # Errors
    /// - [`Error::PulseOverlap`] if `conflict_check` is set and the pulse overlaps with a pulse
    ///   already on the channel;
    /// - [`Error::MissingDefault`] if the channel has no default pulse;
    /// - [`Error::InvalidArgument`] for a non-finite `t0` or a negative duration.
    ///
    /// All checks run before anything is modified, so a failed insert leaves the block unchanged.
    pub fn insert(&mut self, pulse: Pulse, conflict_check: bool) -> Result<()> {
        pulse.validate()?;
        if !self.defaults.contains_key(&pulse.channel) {
            return Err(Error::MissingDefault {
                missing: vec![pulse.channel.clone()],
                defaults: self.defaults.keys().cloned().collect(),
            });
        }
        if conflict_check {
            self.check_overlap(&pulse)?;
        }

        let t0 = pulse.t0;
        let shift = if t0 < 0. { -t0 } else { 0. };
        // Right edge after the shift: a negative t0 lands exactly on 0
        let right_edge = t0.max(0.) + pulse.duration;
        let was_blank = self.is_blank();

        let p_list = self.pulses.entry(pulse.channel.clone()).or_default();
        // Stable: a pulse goes after every pulse with the same t0
        let pos = p_list.partition_point(|p| p.t0 <= t0);
        p_list.insert(pos, pulse);

        self.shift_all(shift);
        // A blank block has no span of its own that the shift could move
        self.duration = if was_blank {
            right_edge
        } else {
            self.duration.max(right_edge)
        };
        Ok(())
    }

    /// Same as [`PulseBlock::insert`], but returns a new block and leaves `self` unchanged.
    pub fn join(&self, pulse: Pulse, conflict_check: bool) -> Result<PulseBlock> {
        let mut new_pb = self.clone();
        new_pb.insert(pulse, conflict_check)?;
        Ok(new_pb)
    }

    /// Same as [`PulseBlock::insert`], but `pulse.t0` is measured from the end of the block.
    pub fn append(&mut self, mut pulse: Pulse, conflict_check: bool) -> Result<()> {
        pulse.t0 += self.duration;
        self.insert(pulse, conflict_check)
    }

    /// Merges `other` into `self`, placing the beginning of `other` at `t0`.
    ///
    /// If `t0` is negative, `other` starts before the beginning of `self` and the time origin
    /// moves to the beginning of `other`.
    ///
    /// With `conflict_check` set, two checks run before any modification:
    /// - when the blocks share a channel with explicit pulses, they must be fully separated in
    ///   time: `self.duration <= t0` for `t0 >= 0`, or `other.duration <= |t0|` for `t0 < 0`.
    ///   Pulse-by-pulse interleaving is deliberately not attempted;
    /// - default pulses defined on a shared channel must be equal.
    pub fn insert_block(&mut self, other: &PulseBlock, t0: f64, conflict_check: bool) -> Result<()> {
        if !t0.is_finite() {
            return Err(Error::invalid(format!(
                "insert_block(): offset t0={} is not finite",
                t0
            )));
        }
        if conflict_check {
            let shared: Vec<String> = self
                .pulses
                .keys()
                .filter(|ch| other.pulses.contains_key(*ch))
                .cloned()
                .collect();
            if !shared.is_empty() {
                if t0 >= 0. && self.duration > t0 {
                    return Err(Error::BlockOverlap {
                        t0,
                        which: "receiving",
                        duration: self.duration,
                        shared,
                    });
                }
                if t0 < 0. && other.duration > -t0 {
                    return Err(Error::BlockOverlap {
                        t0,
                        which: "inserted",
                        duration: other.duration,
                        shared,
                    });
                }
            }
            for (ch, theirs) in other.defaults.iter() {
                if let Some(ours) = self.defaults.get(ch) {
                    if ours != theirs {
                        return Err(Error::DefaultMismatch {
                            channel: ch.clone(),
                            ours: ours.to_string(),
                            theirs: theirs.to_string(),
                        });
                    }
                }
            }
        }
        log::debug!(
            "PulseBlock \"{}\": merging block \"{}\" at t0={:e}",
            self.name,
            other.name,
            t0
        );

        // Shift the later block; the receiver's duration follows its own shift
        let other_shift = if t0 >= 0. {
            t0
        } else {
            if !self.is_blank() {
                self.shift_all(-t0);
            }
            0.
        };
        self.duration = self.duration.max(other.duration + other_shift);

        for (ch, p_list) in other.pulses.iter() {
            let own_list = self.pulses.entry(ch.clone()).or_default();
            own_list.extend(p_list.iter().cloned().map(|mut p| {
                p.t0 += other_shift;
                p
            }));
            // Pulses were appended on the right; restore time order (stable)
            own_list.sort_by(|a, b| a.t0.total_cmp(&b.t0));
        }
        for (ch, default) in other.defaults.iter() {
            if !self.defaults.contains_key(ch) {
                self.defaults.insert(ch.clone(), default.clone());
            }
        }
        Ok(())
    }

    /// Same as [`PulseBlock::insert_block`], but returns a new block and leaves `self` unchanged.
    pub fn join_block(&self, other: &PulseBlock, t0: f64, conflict_check: bool) -> Result<PulseBlock> {
        let mut new_pb = self.clone();
        new_pb.insert_block(other, t0, conflict_check)?;
        Ok(new_pb)
    }

    /// Same as [`PulseBlock::insert_block`], but the beginning of `other` is placed `offset`
    /// after the end of `self`. Only non-negative offsets are allowed; use `insert_block` for
    /// arbitrary positions.
    pub fn append_block(&mut self, other: &PulseBlock, offset: f64, conflict_check: bool) -> Result<()> {
        if offset.is_nan() || offset < 0. {
            return Err(Error::invalid(format!(
                "append_block(): only non-negative offset is allowed, got {:e}. \
                 Use insert_block() or join_block() for arbitrary t0",
                offset
            )));
        }
        self.insert_block(other, self.duration + offset, conflict_check)
    }

    /// Non-mutating variant of [`PulseBlock::append_block`].
    pub fn join_append_block(
        &self,
        other: &PulseBlock,
        offset: f64,
        conflict_check: bool,
    ) -> Result<PulseBlock> {
        let mut new_pb = self.clone();
        new_pb.append_block(other, offset, conflict_check)?;
        Ok(new_pb)
    }

    /// Renames channels, e.g. from human-readable names to hardware channel names
    /// (`'mw_drive' -> 'AO1'`).
    ///
    /// `mapping` must cover every channel of the block, both those with explicit pulses and
    /// those with default pulses, and must not map two channels onto the same name.
    pub fn remap_channels(&mut self, mapping: &HashMap<String, String>) -> Result<()> {
        let missing: BTreeSet<String> = self
            .pulses
            .keys()
            .chain(self.defaults.keys())
            .filter(|ch| !mapping.contains_key(*ch))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let provided: BTreeSet<&String> = mapping.keys().collect();
            return Err(Error::IncompleteMapping {
                op: "remap_channels",
                missing: missing.into_iter().collect(),
                provided: provided.into_iter().cloned().collect(),
            });
        }
        let mut targets: HashMap<&str, Vec<String>> = HashMap::new();
        for ch in self.channels() {
            targets.entry(mapping[ch].as_str()).or_default().push(ch.to_string());
        }
        if let Some((target, sources)) = targets.into_iter().find(|(_, sources)| sources.len() > 1) {
            return Err(Error::MappingCollision {
                target: target.to_string(),
                sources,
            });
        }

        let pulses = std::mem::take(&mut self.pulses);
        self.pulses = pulses
            .into_iter()
            .map(|(ch, mut p_list)| {
                let new_ch = mapping[&ch].clone();
                for pulse in p_list.iter_mut() {
                    pulse.channel = new_ch.clone();
                }
                (new_ch, p_list)
            })
            .collect();
        let defaults = std::mem::take(&mut self.defaults);
        self.defaults = defaults
            .into_iter()
            .map(|(ch, default)| (mapping[&ch].clone(), default))
            .collect();
        log::debug!("PulseBlock \"{}\": remapped channels {:?}", self.name, mapping);
        Ok(())
    }

    /// Time-offsets whole channels relative to the rest of the block, e.g. to compensate for
    /// physical delays between channels. Offsets may be positive or negative; edges are
    /// normalized afterwards.
    pub fn add_offset(&mut self, offsets: &HashMap<String, f64>) -> Result<()> {
        let unknown: BTreeSet<&String> = offsets
            .keys()
            .filter(|ch| !self.pulses.contains_key(*ch))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::UnknownChannels {
                unknown: unknown.into_iter().cloned().collect(),
                known: self.pulses.keys().cloned().collect(),
            });
        }
        if let Some((ch, offset)) = offsets.iter().find(|(_, o)| !o.is_finite()) {
            return Err(Error::invalid(format!(
                "add_offset(): offset {} for channel \"{}\" is not finite",
                offset, ch
            )));
        }
        for (ch, offset) in offsets.iter() {
            if let Some(p_list) = self.pulses.get_mut(ch) {
                for pulse in p_list.iter_mut() {
                    pulse.t0 += offset;
                }
            }
        }
        self.normalize_edges();
        Ok(())
    }

    /// Right-most pulse edge across all channels (0 for a block without pulses).
    pub fn right_edge(&self) -> f64 {
        self.pulses
            .values()
            .filter_map(|p_list| p_list.last())
            .map(|p| p.right_edge())
            .fold(0., f64::max)
    }

    /// Left-most pulse edge across all channels, or `None` for a block without pulses.
    pub fn left_edge(&self) -> Option<f64> {
        self.pulses
            .values()
            .filter_map(|p_list| p_list.first())
            .map(|p| p.t0)
            .reduce(f64::min)
    }

    /// Shifts every pulse so the earliest `t0` across all channels becomes exactly 0, and resets
    /// `duration` to the latest right edge.
    pub fn normalize_edges(&mut self) {
        match self.left_edge() {
            Some(left_edge) => {
                for pulse in self.pulses.values_mut().flatten() {
                    pulse.t0 -= left_edge;
                }
                self.duration = self.right_edge();
            }
            None => self.duration = 0.,
        }
    }

    /// Checks the sampling precondition: every channel with explicit pulses has a default
    /// pulse returning the same kind of values.
    pub fn check_defaults(&self) -> Result<()> {
        let missing: Vec<String> = self
            .pulses
            .keys()
            .filter(|ch| !self.defaults.contains_key(*ch))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingDefault {
                missing,
                defaults: self.defaults.keys().cloned().collect(),
            });
        }
        for (ch, p_list) in self.pulses.iter() {
            let default_kind = self.defaults[ch].return_kind();
            if let Some(pulse) = p_list.iter().find(|p| p.return_kind() != default_kind) {
                return Err(Error::ReturnKindMismatch {
                    channel: ch.clone(),
                    default_kind: default_kind.to_string(),
                    pulse_kind: pulse.return_kind().to_string(),
                    pulse: pulse.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Copies the part of the block between `start_t` and `stop_t` into a new block whose
    /// origin is `start_t` and whose duration is `stop_t - start_t`. Default pulses are copied.
    ///
    /// With `use_centers = false` a pulse belongs to the snippet if both its edges lie in the
    /// window, and a window edge crossing a pulse is an error. With `use_centers = true` the
    /// pulse centre decides; this is robust against float round-off for pulses touching an edge.
    pub fn snip(&self, start_t: f64, stop_t: f64, name: &str, use_centers: bool) -> Result<PulseBlock> {
        if !(start_t.is_finite() && stop_t.is_finite()) || stop_t < start_t {
            return Err(Error::invalid(format!(
                "snip(): invalid window {:e}..{:e}",
                start_t, stop_t
            )));
        }
        let mut new_pb = PulseBlock::with_defaults(self.defaults.clone(), name);
        new_pb.duration = stop_t - start_t;

        for (ch, p_list) in self.pulses.iter() {
            for pulse in p_list {
                let keep = if use_centers {
                    let center = pulse.t0 + pulse.duration / 2.;
                    if center <= start_t {
                        continue;
                    } else if center <= stop_t {
                        true
                    } else {
                        break;
                    }
                } else if pulse.right_edge() <= start_t {
                    continue;
                } else if start_t <= pulse.t0 && pulse.right_edge() <= stop_t {
                    true
                } else if stop_t <= pulse.t0 {
                    break;
                } else {
                    let (edge, edge_t) = if pulse.t0 < start_t {
                        ("start_t", start_t)
                    } else {
                        ("stop_t", stop_t)
                    };
                    return Err(Error::SnipCrossesPulse {
                        channel: ch.clone(),
                        pulse: pulse.to_string(),
                        edge,
                        edge_t,
                    });
                };

                if keep {
                    let mut pulse = pulse.clone();
                    pulse.t0 = (pulse.t0 - start_t).max(0.);
                    new_pb.duration = new_pb.duration.max(pulse.right_edge());
                    new_pb.pulses.entry(ch.clone()).or_default().push(pulse);
                }
            }
        }
        Ok(new_pb)
    }
}

impl fmt::Display for PulseBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut pulse_chs: Vec<&String> = self.pulses.keys().collect();
        pulse_chs.sort();
        let mut dflt_chs: Vec<&String> = self.defaults.keys().collect();
        dflt_chs.sort();

        writeln!(f, "PulseBlock \"{}\"", self.name)?;
        writeln!(f, "pulse_chs = {:?}", pulse_chs)?;
        writeln!(f, "dflt_chs = {:?}", dflt_chs)?;
        writeln!(f, "dur = {:.2e}", self.duration)?;
        writeln!(f, "pulses:")?;
        for (ch, p_list) in self.pulses.iter() {
            writeln!(f, "    {}:", ch)?;
            for pulse in p_list {
                writeln!(
                    f,
                    "        {{{:.2e}, {:.2e}, {}}}",
                    pulse.t0, pulse.duration, pulse.waveform
                )?;
            }
        }
        writeln!(f, "defaults:")?;
        for (ch, default) in self.defaults.iter() {
            writeln!(f, "    {}: {}", ch, default)?;
        }
        Ok(())
    }
}
