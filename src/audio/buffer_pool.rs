// BlockPool - lock-free block pool between the device callback and the loop
//
// Two SPSC ring buffers carry pre-allocated fixed-size blocks:
// - DATA queue: callback pushes filled blocks, capture loop consumes
// - POOL queue: capture loop returns empty blocks, callback recycles
//
// Block flow:
// 1. Callback takes an empty block from POOL and fills it sample by sample
//    (device callbacks deliver arbitrary frame counts)
// 2. Full block goes to DATA, the next empty block is taken from POOL
// 3. Capture loop pops from DATA, copies out, pushes the block back to POOL
//
// The callback never allocates. When the loop falls behind and POOL runs
// dry, incoming samples are dropped and counted as overruns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};

/// Pre-allocated block of mono samples
pub type AudioBlock = Vec<f32>;

/// Poll interval while waiting for a block
const POLL_INTERVAL: Duration = Duration::from_micros(500);

pub struct BlockPool;

impl BlockPool {
    /// Allocate `block_count` blocks of `block_size` samples
    ///
    /// Returns the callback side and the reader side of the pool.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(block_count: usize, block_size: usize) -> (BlockWriter, BlockReader) {
        let block_count = block_count.max(2);
        let block_size = block_size.max(1);

        let (mut pool_producer, mut pool_consumer) = RingBuffer::new(block_count);
        let (data_producer, data_consumer) = RingBuffer::new(block_count);

        for _ in 0..block_count {
            // Capacity equals block_count, so this cannot fail
            let _ = pool_producer.push(vec![0.0_f32; block_size]);
        }
        let current = pool_consumer.pop().ok();
        let overruns = Arc::new(AtomicU64::new(0));

        (
            BlockWriter {
                data_producer,
                pool_consumer,
                current,
                fill: 0,
                overruns: Arc::clone(&overruns),
            },
            BlockReader {
                data_consumer,
                pool_producer,
                overruns,
            },
        )
    }
}

/// Callback side: accumulates samples into fixed-size blocks
pub struct BlockWriter {
    data_producer: Producer<AudioBlock>,
    pool_consumer: Consumer<AudioBlock>,
    current: Option<AudioBlock>,
    fill: usize,
    overruns: Arc<AtomicU64>,
}

impl BlockWriter {
    /// Append one sample; real-time safe
    pub fn push_sample(&mut self, sample: f32) {
        if self.current.is_none() {
            self.current = self.pool_consumer.pop().ok();
            self.fill = 0;
        }

        let Some(block) = self.current.as_mut() else {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        };

        block[self.fill] = sample;
        self.fill += 1;

        if self.fill == block.len() {
            if let Some(full) = self.current.take() {
                // DATA has room for every block in the pool
                let _ = self.data_producer.push(full);
            }
            self.fill = 0;
        }
    }

    /// Append channel 0 of an interleaved buffer
    pub fn push_interleaved<T: Copy>(&mut self, data: &[T], channels: usize, convert: impl Fn(T) -> f32) {
        for frame in data.chunks(channels.max(1)) {
            if let Some(&first) = frame.first() {
                self.push_sample(convert(first));
            }
        }
    }
}

/// Capture-loop side: pops completed blocks
pub struct BlockReader {
    data_consumer: Consumer<AudioBlock>,
    pool_producer: Producer<AudioBlock>,
    overruns: Arc<AtomicU64>,
}

impl BlockReader {
    /// Copy the next full block into `out`, waiting at most `timeout`
    ///
    /// Returns false on timeout.
    pub fn pop_into(&mut self, out: &mut [f32], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(block) = self.data_consumer.pop() {
                let len = out.len().min(block.len());
                out[..len].copy_from_slice(&block[..len]);
                out[len..].fill(0.0);
                let _ = self.pool_producer.push(block);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Samples dropped because no empty block was available
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_assembled_across_pushes() {
        let (mut writer, mut reader) = BlockPool::new(4, 4);
        let mut out = [0.0_f32; 4];

        writer.push_sample(1.0);
        writer.push_sample(2.0);
        assert!(!reader.pop_into(&mut out, Duration::ZERO));

        writer.push_sample(3.0);
        writer.push_sample(4.0);
        assert!(reader.pop_into(&mut out, Duration::ZERO));
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_interleaved_takes_first_channel() {
        let (mut writer, mut reader) = BlockPool::new(4, 3);
        let stereo = [0.1_f32, 9.0, 0.2, 9.0, 0.3, 9.0];
        writer.push_interleaved(&stereo, 2, |s| s);

        let mut out = [0.0_f32; 3];
        assert!(reader.pop_into(&mut out, Duration::ZERO));
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_integer_conversion() {
        let (mut writer, mut reader) = BlockPool::new(2, 2);
        writer.push_interleaved(&[i16::MAX, 0], 1, |s| s as f32 / i16::MAX as f32);

        let mut out = [0.0_f32; 2];
        assert!(reader.pop_into(&mut out, Duration::ZERO));
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn test_blocks_are_recycled() {
        let (mut writer, mut reader) = BlockPool::new(2, 2);
        let mut out = [0.0_f32; 2];
        for round in 0..10 {
            writer.push_sample(round as f32);
            writer.push_sample(round as f32);
            assert!(reader.pop_into(&mut out, Duration::ZERO));
            assert_eq!(out, [round as f32; 2]);
        }
        assert_eq!(reader.overruns(), 0);
    }

    #[test]
    fn test_overrun_when_reader_falls_behind() {
        let (mut writer, reader) = BlockPool::new(2, 2);
        // Two blocks fill the pool, the rest has nowhere to go
        for _ in 0..7 {
            writer.push_sample(0.5);
        }
        assert_eq!(reader.overruns(), 3);
    }

    #[test]
    fn test_timeout_waits_then_gives_up() {
        let (_writer, mut reader) = BlockPool::new(2, 2);
        let mut out = [0.0_f32; 2];
        let start = Instant::now();
        assert!(!reader.pop_into(&mut out, Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<BlockWriter>();
        assert_send::<BlockReader>();
    }
}
