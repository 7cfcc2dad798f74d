//! Compaction through the recorder's copy path.

mod common;

use arbor_gpu::{
    GpuConfig,
    command::Command,
    compact::RegionMove,
};
use common::{buffer, headless, headless_with, key};

#[test]
fn test_compaction_closes_gaps_and_moves_bytes() {
    let (device, context) = headless();
    let buffer = buffer::<u32>(&context, 16);
    let recorder = context.default_recorder();

    let a = buffer.allocate(3).unwrap();
    let gap1 = buffer.allocate(2).unwrap();
    let b = buffer.allocate(2).unwrap();
    let gap2 = buffer.allocate(2).unwrap();
    let c = buffer.allocate(4).unwrap();
    assert_eq!([a.start(), b.start(), c.start()], [0, 5, 9]);

    recorder.upload_allocation(&a, &[1, 2, 3]).unwrap();
    recorder.upload_allocation(&b, &[4, 5]).unwrap();
    recorder.upload_allocation(&c, &[6, 7, 8, 9]).unwrap();
    drop(gap1);
    drop(gap2);
    context.end_frame().unwrap();

    let moves = buffer.compact();
    assert_eq!(
        moves,
        vec![
            RegionMove { from: 5, to: 3, count: 2 },
            RegionMove { from: 9, to: 5, count: 4 },
        ]
    );
    assert_eq!([a.start(), b.start(), c.start()], [0, 3, 5]);
    assert_eq!([a.count(), b.count(), c.count()], [3, 2, 4]);

    let target = key(&buffer);
    let (reads, writes) = recorder.inspect(|stream| {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        for command in stream {
            if let Command::CopyBuffer { src, src_offset, dst, dst_offset, size } = *command {
                if src == target {
                    reads.push((src_offset, size));
                }
                if dst == target {
                    writes.push((dst_offset, size));
                }
            }
        }
        (reads, writes)
    });
    assert_eq!(reads, vec![(20, 8), (36, 16)]);
    assert_eq!(writes, vec![(12, 8), (20, 16)]);

    context.end_frame().unwrap();
    assert_eq!(device.read_elements(&buffer, 0, 9), (1..=9).collect::<Vec<u32>>());
}

#[test]
fn test_compaction_is_idempotent() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 16);

    let gap = buffer.allocate(4).unwrap();
    let kept = buffer.allocate(4).unwrap();
    drop(gap);

    assert_eq!(buffer.compact().len(), 1);
    context.end_frame().unwrap();

    assert!(buffer.compact().is_empty());
    assert!(context.default_recorder().is_empty());
    assert_eq!(kept.start(), 0);
}

#[test]
fn test_compaction_keeps_order_and_contiguity() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 64);

    let all: Vec<_> = (0..12u64)
        .map(|i| buffer.allocate(1 + i % 4).unwrap())
        .collect();
    let kept: Vec<_> = all
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .map(|(_, alloc)| alloc)
        .collect();
    let before: Vec<u64> = kept.iter().map(|a| a.start()).collect();
    buffer.compact();

    let mut next = 0;
    for alloc in &kept {
        assert_eq!(alloc.start(), next);
        next = alloc.end();
    }
    let after: Vec<u64> = kept.iter().map(|a| a.start()).collect();
    let mut sorted = after.clone();
    sorted.sort();
    assert_eq!(after, sorted);
    assert!(before.iter().zip(&after).all(|(b, a)| a <= b));
    context.end_frame().unwrap();
}

#[test]
fn test_compaction_chunks_through_small_scratch() {
    let (device, context) = headless_with(GpuConfig::minimal().with_scratch_size(16));
    let buffer = buffer::<u32>(&context, 32);
    let recorder = context.default_recorder();

    let gap = buffer.allocate(3).unwrap();
    let moved = buffer.allocate(10).unwrap();
    let data: Vec<u32> = (100..110).collect();
    recorder.upload_allocation(&moved, &data).unwrap();
    drop(gap);

    buffer.compact();
    let copies = recorder.inspect(|stream| {
        stream
            .iter()
            .filter(|c| matches!(c, Command::CopyBuffer { size, .. } if *size <= 16))
            .count()
    });
    // 40 bytes through a 16 byte scratch: three chunks, out and back.
    assert!(copies >= 6);

    context.end_frame().unwrap();
    assert_eq!(moved.start(), 0);
    assert_eq!(device.read_elements(&buffer, 0, 10), data);
}
