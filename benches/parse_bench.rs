//! Benchmarks for `nvidia-smi` output parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gpu_picker::gpu::query::{count_listed_devices, shows_active_process};

fn bench_count_listed_devices(c: &mut Criterion) {
    // An 8-GPU node.
    let listing: String = (0..8)
        .map(|i| format!("GPU {i}: NVIDIA A100-SXM4-80GB (UUID: GPU-{i:08x}-0000-0000-0000-000000000000)\n"))
        .collect();

    c.bench_function("count_listed_devices_8", |b| {
        b.iter(|| black_box(count_listed_devices(black_box(&listing))))
    });
}

fn bench_shows_active_process(c: &mut Criterion) {
    // A busy device with many small processes.
    let mut report = String::from("==============NVSMI LOG==============\n\nAttached GPUs : 8\n");
    for pid in 0..64 {
        report.push_str(&format!(
            "        Process ID : {pid}\n            Type : C\n            Used GPU Memory : 512 MiB\n"
        ));
    }
    let idle = "==============NVSMI LOG==============\n    Processes : None\n";

    c.bench_function("shows_active_process_busy", |b| {
        b.iter(|| black_box(shows_active_process(black_box(&report))))
    });
    c.bench_function("shows_active_process_idle", |b| {
        b.iter(|| black_box(shows_active_process(black_box(idle))))
    });
}

criterion_group!(benches, bench_count_listed_devices, bench_shows_active_process);
criterion_main!(benches);
