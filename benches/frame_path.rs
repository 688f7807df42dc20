use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};
use voxshift::model::{DspVoiceModel, MockVoiceModel, VoiceModel, VoiceShift};
use voxshift::pipeline::{
    AudioFrame, FrameTransform, MockClock, ParameterStore, PassthroughTransform, Pipeline,
    TransformParameters, frame_buffer,
};
use voxshift::session::SessionConfig;

const SAMPLE_RATE: u32 = 16000;

/// A 220 Hz tone, loud enough to exercise the shifters.
fn tone(len: usize) -> Vec<i16> {
    (0..len)
        .map(|n| {
            let t = n as f32 / SAMPLE_RATE as f32;
            ((t * 220.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}

fn bench_frame_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_buffer");
    for capacity in [4usize, 16] {
        group.bench_with_input(
            BenchmarkId::new("push_pop", capacity),
            &capacity,
            |b, &capacity| {
                let (mut producer, mut consumer, _handle) =
                    frame_buffer("bench", capacity).unwrap();
                let samples = tone(320);
                let started = Instant::now();
                let mut sequence = 0;
                b.iter(|| {
                    producer.push(AudioFrame::new(sequence, started, samples.clone()));
                    sequence += 1;
                    black_box(consumer.pop())
                });
            },
        );
    }
    group.finish();
}

fn bench_transforms(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_frame");
    let params = TransformParameters::new(5.0, 1.2, 0.8);

    for frame_size in [160usize, 320, 640] {
        let frame = AudioFrame::new(0, Instant::now(), tone(frame_size));

        group.bench_with_input(BenchmarkId::new("passthrough", frame_size), &frame, |b, frame| {
            let mut shifter = PassthroughTransform::new(SAMPLE_RATE);
            b.iter(|| black_box(shifter.apply(frame, &params).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("dsp_model", frame_size), &frame, |b, frame| {
            let mut model = DspVoiceModel::new(SAMPLE_RATE);
            let shift = VoiceShift::from(&params);
            b.iter(|| black_box(model.transform(frame, shift).unwrap()));
        });
    }
    group.finish();
}

fn bench_pipeline_cycle(c: &mut Criterion) {
    let config = SessionConfig {
        model_timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let clock = MockClock::new();
    let mut pipeline = Pipeline::build(
        &config,
        MockVoiceModel::new("bench"),
        Arc::new(ParameterStore::default()),
        Arc::new(clock.clone()),
    )
    .unwrap();
    let input = tone(config.frame_size);
    let mut out = vec![0i16; config.frame_size];

    c.bench_function("pipeline_cycle", |b| {
        b.iter(|| {
            clock.advance(Duration::from_millis(20));
            pipeline.capture.on_chunk(black_box(&input));
            pipeline.transform.drain_ready();
            pipeline.playback.fill(&mut out);
            black_box(&out);
        });
    });
}

criterion_group!(
    benches,
    bench_frame_buffer,
    bench_transforms,
    bench_pipeline_cycle
);
criterion_main!(benches);
