//! Region placement, growth and concurrent allocation against the headless device.

mod common;

use std::thread;

use arbor_gpu::{BufferAllocation, GpuConfig};
use common::{buffer, headless, headless_with};

#[test]
fn test_first_fit_reuses_freed_range() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 8);

    let first = buffer.allocate(3).unwrap();
    let second = buffer.allocate(4).unwrap();
    assert_eq!(first.start(), 0);
    assert_eq!(second.start(), 3);

    first.release();
    let third = buffer.allocate(2).unwrap();
    assert_eq!(third.start(), 0);
    assert_eq!(buffer.capacity(), 8);
    assert_eq!(buffer.allocated_ranges(), vec![(0, 2), (3, 4)]);
}

#[test]
fn test_growth_doubles_and_retries() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 4);

    let first = buffer.allocate(3).unwrap();
    let second = buffer.allocate(3).unwrap();

    assert_eq!(buffer.capacity(), 8);
    assert_eq!(first.start(), 0);
    assert_eq!(second.start(), 3);
    context.end_frame().unwrap();
}

#[test]
fn test_growth_repeats_until_the_request_fits() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 1);

    let big = buffer.allocate(10).unwrap();
    assert_eq!(big.start(), 0);
    assert_eq!(buffer.capacity(), 16);
    context.end_frame().unwrap();
}

#[test]
fn test_growth_preserves_existing_data() {
    let (device, context) = headless();
    let buffer = buffer::<u32>(&context, 4);
    let recorder = context.default_recorder();

    let first = buffer.allocate(4).unwrap();
    recorder.upload_allocation(&first, &[1, 2, 3, 4]).unwrap();
    let second = buffer.allocate(4).unwrap();
    recorder.upload_allocation(&second, &[5, 6, 7, 8]).unwrap();
    context.end_frame().unwrap();

    assert_eq!(first.start(), 0);
    assert_eq!(second.start(), 4);
    assert_eq!(device.read_elements(&buffer, 0, 8), vec![1, 2, 3, 4, 5, 6, 7, 8]);

    // The storage replaced by growth is gone once the frame executed.
    assert_eq!(device.stats().buffers_destroyed, 1);
}

#[test]
fn test_growth_past_the_maximum_fails() {
    let (_device, context) = headless_with(GpuConfig::minimal().with_max_buffer_size(64));
    let buffer = buffer::<u32>(&context, 16);

    let full = buffer.allocate(16).unwrap();
    let err = buffer.allocate(1).unwrap_err();

    assert!(format!("{err:#}").contains("maximum buffer size"));
    assert_eq!(buffer.capacity(), 16);
    assert_eq!(buffer.allocation_count(), 1);
    assert_eq!(full.start(), 0);
    assert!(context.default_recorder().is_empty());
}

#[test]
fn test_oversized_count_is_an_error() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 8);
    let held = buffer.allocate(2).unwrap();

    let err = buffer.allocate(u64::MAX).unwrap_err();
    assert!(format!("{err:#}").contains("maximum buffer size"));
    assert!(buffer.allocate(u64::MAX - 1).is_err());

    assert_eq!(buffer.capacity(), 8);
    assert_eq!(buffer.allocation_count(), 1);
    assert_eq!(held.start(), 0);
    assert!(context.default_recorder().is_empty());
}

#[test]
fn test_initial_capacity_past_the_maximum_fails() {
    let (_device, context) = headless_with(GpuConfig::minimal().with_max_buffer_size(64));
    let result = context.create_buffer::<u32>(arbor_gpu::BufferSpec::new(17));
    assert!(result.is_err());
}

#[test]
fn test_zero_count_allocation_sits_at_zero() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 2);

    let full = buffer.allocate(2).unwrap();
    let empty = buffer.allocate(0).unwrap();

    assert_eq!(empty.start(), 0);
    assert_eq!(empty.count(), 0);
    assert_eq!(full.start(), 0);
    assert_eq!(buffer.capacity(), 2);
}

#[test]
fn test_clear_releases_outstanding_handles() {
    let (_device, context) = headless();
    let buffer = buffer::<u32>(&context, 8);

    let a = buffer.allocate(4).unwrap();
    let b = buffer.allocate(4).unwrap();
    buffer.clear();

    assert!(!a.is_live());
    assert!(!b.is_live());
    assert_eq!(buffer.allocation_count(), 0);

    // Dropping released handles must not disturb new allocations.
    let c = buffer.allocate(8).unwrap();
    drop(a);
    drop(b);
    assert_eq!(c.start(), 0);
    assert_eq!(buffer.allocation_count(), 1);
}

#[test]
fn test_concurrent_allocations_never_overlap() {
    let (device, context) = headless();
    let buffer = buffer::<u32>(&context, 16);
    let recorder = context.default_recorder();

    let allocations: Vec<(u32, BufferAllocation<u32>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let buffer = buffer.clone();
                s.spawn(move || {
                    let mut mine = Vec::new();
                    for i in 0..25u32 {
                        let value = t * 1000 + i;
                        let alloc = buffer.allocate(1 + (i % 5) as u64).unwrap();
                        let data = vec![value; alloc.count() as usize];
                        recorder.upload_allocation(&alloc, &data).unwrap();
                        mine.push((value, alloc));
                    }
                    mine
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let mut ranges = buffer.allocated_ranges();
    assert_eq!(ranges.len(), allocations.len());
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{pair:?} overlap");
    }
    assert!(ranges.last().is_some_and(|(start, count)| start + count <= buffer.capacity()));

    context.end_frame().unwrap();
    for (value, alloc) in &allocations {
        let stored = device.read_elements(&buffer, alloc.start(), alloc.count());
        assert!(stored.iter().all(|v| v == value));
    }
}
