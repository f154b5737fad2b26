//! # Profile ring buffer
//!
//! Fixed-capacity word store for profile samples. Each sample is laid out as
//!
//! ```text
//!   frame_0 .. frame_n-1 | tid+1 | task | cycle_clock | sleep_state+1 | 0 | 0
//! ```
//!
//! Thread id and sleep state are stored plus one so that the only zero pair in
//! a well-formed buffer is the end-of-sample marker.
//!
//! Despite the name the buffer never wraps: once a full-size sample no longer
//! fits, [`ProfileRingBuffer::record_sample`] refuses it and the profiler
//! stops until the buffer is cleared. All storage is allocated up front so
//! recording never allocates while the target thread is suspended.

use crate::error::{FaultlineError, FaultlineResult};

/// Words of metadata and terminator appended to every sample.
pub const SAMPLE_OVERHEAD: usize = 6;

/// Metadata recorded with every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleMetadata
{
    /// Runtime thread id of the sampled thread
    pub thread_id: u32,
    /// Task the thread was running
    pub task: usize,
    /// Cycle counter at sampling time
    pub cycle_clock: u64,
    /// Scheduler sleep state of the thread
    pub sleep_state: u8,
}

/// One decoded sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample<'a>
{
    /// Backtrace frames, innermost first
    pub frames: &'a [usize],
    /// Metadata stored after the frames
    pub metadata: SampleMetadata,
}

/// Append-only sample store that halts instead of overwriting
#[derive(Debug)]
pub struct ProfileRingBuffer
{
    data: Box<[usize]>,
    len: usize,
    max_frames: usize,
    ends: Vec<usize>,
}

impl ProfileRingBuffer
{
    /// Allocate a buffer of `capacity` words for samples of at most `max_frames` frames.
    pub fn new(capacity: usize, max_frames: usize) -> Self
    {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            len: 0,
            max_frames: max_frames.max(1),
            ends: Vec::with_capacity(capacity / SAMPLE_OVERHEAD + 1),
        }
    }

    /// Declared capacity in words.
    pub fn capacity(&self) -> usize
    {
        self.data.len()
    }

    /// Words recorded so far.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Whether no sample has been recorded.
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Frame budget of one sample.
    pub fn max_frames(&self) -> usize
    {
        self.max_frames
    }

    /// Number of samples recorded.
    pub fn sample_count(&self) -> usize
    {
        self.ends.len()
    }

    /// Whether a full-size sample no longer fits.
    pub fn is_full(&self) -> bool
    {
        self.capacity() - self.len < self.max_frames + SAMPLE_OVERHEAD
    }

    /// Append one sample.
    ///
    /// `walk` receives room for at most `max_frames` frames and returns how
    /// many it wrote. Returns the number of frames recorded.
    ///
    /// ## Errors
    ///
    /// - `ProfileBufferFull`: nothing was written and `walk` was not called
    pub fn record_sample<F>(&mut self, metadata: SampleMetadata, walk: F) -> FaultlineResult<usize>
    where
        F: FnOnce(&mut [usize]) -> usize,
    {
        if self.is_full() {
            return Err(FaultlineError::ProfileBufferFull {
                capacity: self.capacity(),
            });
        }

        let start = self.len;
        let room = &mut self.data[start..start + self.max_frames];
        let frames = walk(room).min(self.max_frames);

        let mut at = start + frames;
        for word in [
            metadata.thread_id as usize + 1,
            metadata.task,
            metadata.cycle_clock as usize,
            usize::from(metadata.sleep_state) + 1,
            0,
            0,
        ] {
            self.data[at] = word;
            at += 1;
        }
        self.len = at;
        self.ends.push(at);
        Ok(frames)
    }

    /// Raw recorded words, in the layout described in the module docs.
    pub fn as_words(&self) -> &[usize]
    {
        &self.data[..self.len]
    }

    /// Decoded samples in recording order.
    pub fn samples(&self) -> impl Iterator<Item = Sample<'_>> + '_
    {
        let mut start = 0;
        self.ends.iter().map(move |&end| {
            let block = &self.data[start..end];
            start = end;
            let (frames, meta) = block.split_at(block.len() - SAMPLE_OVERHEAD);
            Sample {
                frames,
                metadata: SampleMetadata {
                    thread_id: (meta[0] - 1) as u32,
                    task: meta[1],
                    cycle_clock: meta[2] as u64,
                    sleep_state: (meta[3] - 1) as u8,
                },
            }
        })
    }

    /// Drop every sample.
    pub fn clear(&mut self)
    {
        self.len = 0;
        self.ends.clear();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn meta() -> SampleMetadata
    {
        SampleMetadata {
            thread_id: 0,
            task: 77,
            cycle_clock: 1234,
            sleep_state: 0,
        }
    }

    #[test]
    fn test_sample_layout()
    {
        let mut ring = ProfileRingBuffer::new(64, 4);
        let frames = ring
            .record_sample(meta(), |buf| {
                buf[0] = 0xa1;
                buf[1] = 0xa2;
                2
            })
            .unwrap();
        assert_eq!(frames, 2);
        assert_eq!(ring.as_words(), &[0xa1, 0xa2, 1, 77, 1234, 1, 0, 0]);
    }

    #[test]
    fn test_walker_cannot_overrun_frame_budget()
    {
        let mut ring = ProfileRingBuffer::new(64, 3);
        let frames = ring.record_sample(meta(), |buf| {
            assert_eq!(buf.len(), 3);
            buf.fill(9);
            100
        });
        assert_eq!(frames.unwrap(), 3);
        assert_eq!(ring.len(), 3 + SAMPLE_OVERHEAD);
    }

    #[test]
    fn test_samples_decode_metadata()
    {
        let mut ring = ProfileRingBuffer::new(64, 4);
        ring.record_sample(meta(), |buf| {
            buf[0] = 5;
            1
        })
        .unwrap();
        let sample = ring.samples().next().unwrap();
        assert_eq!(sample.frames, &[5]);
        assert_eq!(sample.metadata, meta());
    }

    #[test]
    fn test_clear_resets()
    {
        let mut ring = ProfileRingBuffer::new(32, 2);
        ring.record_sample(meta(), |_| 0).unwrap();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.sample_count(), 0);
    }
}
