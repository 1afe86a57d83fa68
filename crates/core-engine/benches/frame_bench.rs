//! Frame-processing throughput on a synthetic typing burst.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use core_config::EngineSettings;
use core_engine::Engine;
use core_events::{ContactPhase, RawContact, RawFrame, Side, queue::DispatchQueue};
use core_geometry::{default_layer_maps, preset_6x3};

const MS: u64 = 1_000_000;

fn typing_burst(frames_per_tap: u64, taps: u64) -> Vec<RawFrame> {
    let layout = preset_6x3();
    let maps = default_layer_maps(Side::Left);
    let bindings = layout.bindings(Side::Left, &maps[0], &[]);
    let keys: Vec<_> = bindings
        .iter()
        .filter(|b| b.label.len() == 1)
        .map(|b| b.rect.center())
        .collect();

    let mut frames = Vec::new();
    let mut ticks = 0u64;
    for tap in 0..taps {
        let c = keys[tap as usize % keys.len()];
        let id = tap as u32;
        for f in 0..frames_per_tap {
            let phase = if f + 1 == frames_per_tap {
                ContactPhase::Breaking
            } else if f == 0 {
                ContactPhase::Making
            } else {
                ContactPhase::Touching
            };
            frames.push(RawFrame {
                device: 0,
                ticks,
                contacts: vec![RawContact {
                    id,
                    x: c.x,
                    y: c.y,
                    pressure: 1.0,
                    phase,
                }],
            });
            ticks += 8 * MS;
        }
        ticks += 30 * MS;
    }
    frames
}

fn bench_process_frame(c: &mut Criterion) {
    let frames = typing_burst(8, 64);
    c.bench_function("typing_burst_64_taps", |b| {
        b.iter(|| {
            let (tx, rx) = DispatchQueue::bounded(4096);
            let mut engine = Engine::new(EngineSettings::default(), tx);
            for frame in &frames {
                engine.ingest(black_box(frame));
            }
            black_box(rx.drain().len())
        })
    });
}

criterion_group!(benches, bench_process_frame);
criterion_main!(benches);
