use rubato::{FftFixedIn, Resampler};

const CHUNK_SIZE: usize = 256;

/// Streaming mono resampler that can be flushed without losing the tail.
///
/// Input arrives in arbitrary block sizes from the device callback; rubato
/// wants fixed chunks, so the remainder is buffered between calls. The
/// filter delay is skipped at the head so the output lines up with the input.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
    consumed: u64,
    emitted: u64,
    skip: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let inner = if from_rate == to_rate {
            None
        } else {
            match FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(from_rate, to_rate, error = %e, "sinc resampler unavailable, using linear");
                    None
                }
            }
        };
        let skip = inner.as_ref().map(|r| r.output_delay()).unwrap_or(0);
        Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            from_rate,
            to_rate,
            consumed: 0,
            emitted: 0,
            skip,
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.consumed += samples.len() as u64;
        let Some(inner) = self.inner.as_mut() else {
            let out = resample_linear(samples, self.from_rate, self.to_rate);
            self.emitted += out.len() as u64;
            return out;
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            match inner.process(&[chunk], None) {
                Ok(mut resampled) => {
                    if let Some(channel) = resampled.pop() {
                        out.extend(channel);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "resampler chunk failed"),
            }
        }
        self.take_aligned(out)
    }

    /// Push out everything still buffered, padding with silence and
    /// truncating to the exact expected length.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.inner.is_none() {
            return Vec::new();
        }
        let expected = self.expected_len();
        let before = self.emitted;

        let mut out = Vec::new();
        let mut rounds = 0;
        while self.emitted < expected && rounds < 64 {
            let fill = CHUNK_SIZE - self.pending.len() % CHUNK_SIZE;
            self.pending.extend(std::iter::repeat(0.0).take(fill));
            out.extend(self.process(&[]));
            rounds += 1;
        }
        self.pending.clear();

        out.truncate(expected.saturating_sub(before) as usize);
        self.emitted = before + out.len() as u64;
        out
    }

    fn expected_len(&self) -> u64 {
        (self.consumed as f64 * self.to_rate as f64 / self.from_rate as f64).round() as u64
    }

    fn take_aligned(&mut self, mut out: Vec<f32>) -> Vec<f32> {
        if self.skip > 0 {
            let n = self.skip.min(out.len());
            out.drain(..n);
            self.skip -= n;
        }
        self.emitted += out.len() as u64;
        out
    }
}

/// Average interleaved frames into one channel.
pub fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let inv = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * inv)
        .collect()
}

/// Linear interpolation; used where per-call latency matters more than quality.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).round() as usize;
    (0..new_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos.floor() as usize;
            let frac = pos.fract() as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                (Some(a), None) => *a,
                _ => 0.0,
            }
        })
        .collect()
}
