use ringbuf::traits::Producer;

use jambuster::audio::capture::{CapturePump, CAPTURE_BLOCK};
use jambuster::audio::pcm::{bytes_to_frame, decode_base64, EncodedChunk};

const SOURCE_RATE: u32 = 48_000;
const TARGET_RATE: u32 = 16_000;

fn collect_chunks(pump: &mut CapturePump<ringbuf::HeapCons<f32>>) -> Vec<EncodedChunk> {
    let mut chunks = Vec::new();
    pump.drain(|c| chunks.push(c));
    chunks
}

#[test]
fn full_blocks_become_chunks_at_the_target_rate() {
    let (mut producer, mut pump, _muted) =
        CapturePump::with_ring(CAPTURE_BLOCK * 4, SOURCE_RATE, TARGET_RATE);

    let block: Vec<f32> = vec![0.5; CAPTURE_BLOCK * 2];
    producer.push_slice(&block);

    let chunks = collect_chunks(&mut pump);
    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let bytes = decode_base64(&chunk.data).unwrap();
        // 48k -> 16k is a 3:1 reduction of a 4096-sample block.
        assert_eq!(bytes.len() / 2, CAPTURE_BLOCK / 3);
    }
}

#[test]
fn partial_block_emits_nothing() {
    let (mut producer, mut pump, _muted) =
        CapturePump::with_ring(CAPTURE_BLOCK * 2, SOURCE_RATE, TARGET_RATE);

    producer.push_slice(&vec![0.1; CAPTURE_BLOCK - 1]);
    assert_eq!(collect_chunks(&mut pump).len(), 0);

    // One more sample completes the block.
    let _ = producer.try_push(0.1);
    assert_eq!(collect_chunks(&mut pump).len(), 1);
}

#[test]
fn mute_keeps_cadence_but_silences_content() {
    let (mut producer, mut pump, muted) =
        CapturePump::with_ring(CAPTURE_BLOCK * 4, SOURCE_RATE, TARGET_RATE);

    producer.push_slice(&vec![0.8; CAPTURE_BLOCK]);
    muted.store(true, std::sync::atomic::Ordering::Relaxed);

    // The block still comes through: mute changes content, not delivery.
    let chunks = collect_chunks(&mut pump);
    assert_eq!(chunks.len(), 1);

    let bytes = decode_base64(&chunks[0].data).unwrap();
    let frame = bytes_to_frame(&bytes, TARGET_RATE, 1);
    assert!(frame.samples.iter().all(|&s| s == 0.0));

    // Unmuting restores content at the same cadence.
    muted.store(false, std::sync::atomic::Ordering::Relaxed);
    producer.push_slice(&vec![0.8; CAPTURE_BLOCK]);
    let chunks = collect_chunks(&mut pump);
    assert_eq!(chunks.len(), 1);
    let bytes = decode_base64(&chunks[0].data).unwrap();
    let frame = bytes_to_frame(&bytes, TARGET_RATE, 1);
    assert!(frame.samples.iter().all(|&s| (s - 0.8).abs() < 0.001));
}

#[test]
fn chunk_content_round_trips_through_the_codec() {
    let (mut producer, mut pump, _muted) =
        CapturePump::with_ring(CAPTURE_BLOCK * 2, SOURCE_RATE, TARGET_RATE);

    producer.push_slice(&vec![-0.25; CAPTURE_BLOCK]);
    let chunks = collect_chunks(&mut pump);
    assert_eq!(chunks.len(), 1);

    let bytes = decode_base64(&chunks[0].data).unwrap();
    let frame = bytes_to_frame(&bytes, TARGET_RATE, 1);
    // Constant input survives the box filter and quantization.
    assert!(frame.samples.iter().all(|&s| (s + 0.25).abs() < 0.001));
}
