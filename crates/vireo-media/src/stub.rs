//! In-memory decoder used by tests and the synthetic-stream demo.
//!
//! The stub mimics the platform decoder's buffer protocol: it announces
//! all input buffers on creation, recycles a buffer as soon as it is
//! queued, and produces one output buffer per non-config submission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{
    DecoderConfig, DecoderEvent, DecoderFactory, EventSink, MediaError, MediaResult, VideoDecoder,
};

/// One input buffer handed to the stub, as observed by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubSubmission {
    pub timestamp_us: u64,
    pub codec_config: bool,
    pub bytes: usize,
}

#[derive(Debug, Default)]
struct StubState {
    staged: HashMap<usize, Vec<u8>>,
    submissions: Vec<StubSubmission>,
    released: Vec<(usize, bool)>,
    next_output_index: usize,
    stopped: bool,
}

pub struct StubDecoder {
    config: DecoderConfig,
    input_capacity: usize,
    state: Arc<Mutex<StubState>>,
    events: EventSink,
}

impl StubDecoder {
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

impl VideoDecoder for StubDecoder {
    fn write_input(&mut self, index: usize, data: &[u8]) -> MediaResult<usize> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(MediaError::Decoder("stub stopped".into()));
        }
        let staged = state.staged.entry(index).or_default();
        let room = self.input_capacity.saturating_sub(staged.len());
        if room == 0 {
            return Err(MediaError::InvalidBuffer(index));
        }
        let n = data.len().min(room);
        staged.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn queue_input(
        &mut self,
        index: usize,
        timestamp_us: u64,
        codec_config: bool,
    ) -> MediaResult<()> {
        let output = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return Err(MediaError::Decoder("stub stopped".into()));
            }
            let staged = state
                .staged
                .remove(&index)
                .ok_or(MediaError::InvalidBuffer(index))?;
            state.submissions.push(StubSubmission {
                timestamp_us,
                codec_config,
                bytes: staged.len(),
            });
            if codec_config {
                None
            } else {
                let out = state.next_output_index;
                state.next_output_index += 1;
                Some(out)
            }
        };

        // The real codec recycles input buffers and reports decoded
        // output asynchronously; the stub does both inline.
        (self.events)(DecoderEvent::InputBufferAvailable(index));
        if let Some(out) = output {
            (self.events)(DecoderEvent::OutputBufferAvailable {
                index: out,
                timestamp_us,
            });
        }
        Ok(())
    }

    fn release_output(&mut self, index: usize, render: bool) {
        let mut state = self.state.lock().unwrap();
        state.released.push((index, render));
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
    }
}

/// Factory producing `StubDecoder`s and retaining a handle to each for
/// later inspection.
pub struct StubDecoderFactory {
    input_buffers: usize,
    input_capacity: usize,
    created: Mutex<Vec<Arc<Mutex<StubState>>>>,
}

impl StubDecoderFactory {
    pub fn new(input_buffers: usize, input_capacity: usize) -> Self {
        Self {
            input_buffers,
            input_capacity,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Number of decoder instances created so far.
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn state(&self, nth: usize) -> Arc<Mutex<StubState>> {
        Arc::clone(&self.created.lock().unwrap()[nth])
    }

    /// Submissions observed by decoder instance `nth`.
    pub fn submissions(&self, nth: usize) -> Vec<StubSubmission> {
        let state = self.state(nth);
        let state = state.lock().unwrap();
        state.submissions.clone()
    }

    /// `(output_index, rendered)` pairs released by decoder instance `nth`.
    pub fn released(&self, nth: usize) -> Vec<(usize, bool)> {
        let state = self.state(nth);
        let state = state.lock().unwrap();
        state.released.clone()
    }

    pub fn is_stopped(&self, nth: usize) -> bool {
        let state = self.state(nth);
        let state = state.lock().unwrap();
        state.stopped
    }
}

impl DecoderFactory for StubDecoderFactory {
    fn create(&self, config: &DecoderConfig, events: EventSink)
        -> MediaResult<Box<dyn VideoDecoder>> {
        let state = Arc::new(Mutex::new(StubState::default()));
        self.created.lock().unwrap().push(Arc::clone(&state));

        for index in 0..self.input_buffers {
            events(DecoderEvent::InputBufferAvailable(index));
        }

        Ok(Box::new(StubDecoder {
            config: config.clone(),
            input_capacity: self.input_capacity,
            state,
            events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Codec, DecoderPriority};

    fn config() -> DecoderConfig {
        DecoderConfig {
            codec: Codec::H264,
            priority: DecoderPriority::Realtime,
            csd: vec![0, 0, 0, 1, 0x67],
        }
    }

    #[test]
    fn test_stub_announces_input_buffers() {
        let factory = StubDecoderFactory::new(3, 1024);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: EventSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |ev| seen.lock().unwrap().push(ev))
        };
        let _decoder = factory.create(&config(), sink).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                DecoderEvent::InputBufferAvailable(0),
                DecoderEvent::InputBufferAvailable(1),
                DecoderEvent::InputBufferAvailable(2),
            ]
        );
    }

    #[test]
    fn test_stub_emits_output_per_frame_submission() {
        let factory = StubDecoderFactory::new(2, 1024);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: EventSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |ev| seen.lock().unwrap().push(ev))
        };
        let mut decoder = factory.create(&config(), sink).unwrap();
        seen.lock().unwrap().clear();

        decoder.write_input(0, &[1, 2, 3]).unwrap();
        decoder.queue_input(0, 0, true).unwrap();
        decoder.write_input(1, &[4, 5]).unwrap();
        decoder.queue_input(1, 777, false).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                DecoderEvent::InputBufferAvailable(0),
                DecoderEvent::InputBufferAvailable(1),
                DecoderEvent::OutputBufferAvailable {
                    index: 0,
                    timestamp_us: 777
                },
            ]
        );
        assert_eq!(
            factory.submissions(0),
            vec![
                StubSubmission {
                    timestamp_us: 0,
                    codec_config: true,
                    bytes: 3
                },
                StubSubmission {
                    timestamp_us: 777,
                    codec_config: false,
                    bytes: 2
                },
            ]
        );
    }

    #[test]
    fn test_stub_partial_write() {
        let factory = StubDecoderFactory::new(1, 4);
        let sink: EventSink = Arc::new(|_| {});
        let mut decoder = factory.create(&config(), sink).unwrap();

        let copied = decoder.write_input(0, &[0u8; 10]).unwrap();
        assert_eq!(copied, 4);
        assert!(decoder.write_input(0, &[0u8; 6]).is_err());
    }
}
