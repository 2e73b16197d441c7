use maplit::hashmap;
use pulseblock_backend::*;

fn main() -> Result<()> {
    // Readout gate: two 10 ns pulses on an idle-low line
    let mut gate = PulseBlock::with_defaults(
        hashmap! {"aom_gate".to_string() => DefaultPulse::low()},
        "gate",
    );
    gate.insert(Pulse::high("aom_gate", 0., 10e-9), true)?;
    gate.insert(Pulse::high("aom_gate", 20e-9, 10e-9), true)?;

    // Microwave drive played right after the gate
    let mut drive = PulseBlock::with_defaults(
        hashmap! {"mw_drive".to_string() => DefaultPulse::constant(0.)},
        "drive",
    );
    drive.insert(Pulse::sin("mw_drive", 0., 40e-9, 0.5, 100e6, 0., None), true)?;

    let mut seq = gate.join_append_block(&drive, 5e-9, true)?;
    seq.set_name("rabi");
    seq.remap_channels(&hashmap! {
        "aom_gate".to_string() => "DO0".to_string(),
        "mw_drive".to_string() => "AO0".to_string(),
    })?;
    println!("{}", seq);

    let hw = HardwareConstraints {
        len_min: 16,
        len_step: 16,
        ..Default::default()
    };
    let res = sample(&seq, 1e9, &hw)?;
    println!("n_pts = {}, add_pts = {}", res.n_pts, res.add_pts);
    for (ch, samples) in res.samples.iter() {
        println!("{}: {:?}", ch, samples.to_f64());
    }
    Ok(())
}
