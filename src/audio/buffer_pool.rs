//! Lock-free handoff between the `cpal` capture callback and the analysis
//! thread (spec.md §5 "the implementation must not block inside the
//! callback"). Adapted from the donor's `audio/buffer_pool.rs` dual SPSC
//! ring-buffer design: there, `Vec<f32>` buffers circulate between an audio
//! and an analysis thread; here, `Vec<i16>` PCM blocks do the same, since
//! spec.md is explicit about int16 PCM.

use rtrb::{Consumer, Producer, RingBuffer};

pub type AudioBlock = Vec<i16>;

/// Producer/consumer halves used by the capture callback.
pub struct CaptureChannels {
    pub pool_consumer: Consumer<AudioBlock>,
    pub data_producer: Producer<AudioBlock>,
}

/// Producer/consumer halves used by the analysis thread.
pub struct AnalysisChannels {
    pub data_consumer: Consumer<AudioBlock>,
    pub pool_producer: Producer<AudioBlock>,
}

/// Pre-allocates `block_count` buffers of `block_len` int16 samples and
/// returns the split channel halves. All heap allocation happens here, so
/// neither the capture callback nor the analysis thread allocates on the
/// steady-state path.
pub fn build(block_count: usize, block_len: usize) -> (CaptureChannels, AnalysisChannels) {
    let (mut pool_producer, pool_consumer) = RingBuffer::new(block_count);
    let (data_producer, data_consumer) = RingBuffer::new(block_count);

    for _ in 0..block_count {
        pool_producer
            .push(vec![0i16; block_len])
            .expect("pool ring buffer sized to block_count");
    }

    (
        CaptureChannels { pool_consumer, data_producer },
        AnalysisChannels { data_consumer, pool_producer },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_allocates_requested_buffer_count() {
        let (mut capture, _analysis) = build(4, 128);
        let mut drained = 0;
        while capture.pool_consumer.pop().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 4);
    }

    #[test]
    fn block_round_trips_through_both_queues() {
        let (mut capture, mut analysis) = build(2, 8);
        let mut block = capture.pool_consumer.pop().unwrap();
        block[0] = 42;
        capture.data_producer.push(block).unwrap();

        let block = analysis.data_consumer.pop().unwrap();
        assert_eq!(block[0], 42);
        analysis.pool_producer.push(block).unwrap();

        let block = capture.pool_consumer.pop().unwrap();
        assert_eq!(block[0], 42);
    }
}
