use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use cloud_audio_relay::audio::ReorderBuffer;
use cloud_audio_relay::protocol::Packet;

const PAYLOAD: usize = 1024;

fn packets(count: usize, shuffle_window: usize) -> Vec<Packet> {
    let payload = Bytes::from(vec![0u8; PAYLOAD]);
    let mut positions: Vec<i32> = (0..count as i32).map(|i| i * PAYLOAD as i32).collect();
    // Deterministic local reordering
    for chunk in positions.chunks_mut(shuffle_window) {
        chunk.reverse();
    }
    positions
        .into_iter()
        .map(|pos| Packet::new(1, 0, pos, payload.clone()))
        .collect()
}

fn bench_reorder(c: &mut Criterion) {
    let input = packets(4096, 4);

    c.bench_function("offer_and_drain", |b| {
        b.iter_batched(
            || input.clone(),
            |packets| {
                let mut buffer = ReorderBuffer::new(15);
                for packet in packets {
                    buffer.offer(packet);
                    if buffer.len() > 10 {
                        if let Some(p) = buffer.pop_min() {
                            buffer.advance_to(p.end_position());
                        }
                    }
                }
                black_box(buffer.len())
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("sustained_overflow", |b| {
        b.iter_batched(
            || input.clone(),
            |packets| {
                let mut buffer = ReorderBuffer::new(15);
                for packet in packets {
                    black_box(buffer.offer(packet));
                }
                black_box(buffer.stats())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
