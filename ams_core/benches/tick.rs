use ams_config::load_toml;
use ams_core::engine::Engine;
use ams_host::{SimHub, SimJob};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const CONFIG: &str = r#"
[[hub]]
name = "hub0"
fps = "fps0"
upper_threshold = 0.65
lower_threshold = 0.35
lane_hes_on = [0.5, 0.5, 0.5, 0.5]
hub_hes_on = [0.5, 0.5, 0.5, 0.5]
path_length_mm = 1140.0

[[hub]]
name = "hub1"
fps = "fps1"
upper_threshold = 0.65
lower_threshold = 0.35
lane_hes_on = [0.5, 0.5, 0.5, 0.5]
hub_hes_on = [0.5, 0.5, 0.5, 0.5]
path_length_mm = 900.0

[[fps]]
name = "fps0"
extruder = "extruder"

[[fps]]
name = "fps1"
extruder = "extruder1"
"#;

fn bench_tick(c: &mut Criterion) {
    let cfg = load_toml(CONFIG).expect("config");
    let (hub0, h0) = SimHub::new("hub0");
    let (hub1, _h1) = SimHub::new("hub1");
    let (job, jh) = SimJob::new();
    let mut engine = Engine::from_config(&cfg, vec![hub0, hub1], job).expect("engine");

    h0.set_lane_present(0, true);
    h0.set_hub_present(0, true);
    jh.set_printing(true);
    engine.determine_state(0);

    let mut now = 0u64;
    c.bench_function("engine_tick_two_hubs", |b| {
        b.iter(|| {
            now += 1000;
            jh.extrude_mm("extruder", 5.0);
            h0.add_encoder_clicks(3);
            black_box(engine.tick(black_box(now)))
        })
    });
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
