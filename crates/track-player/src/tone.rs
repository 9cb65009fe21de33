//! PCM16 sine tone generator.

use std::f32::consts::TAU;

pub struct Tone {
    channels: usize,
    sample_rate: u32,
    step: f32,
    phase: f32,
    amplitude: f32,
    frames_out: u64,
}

impl Tone {
    pub fn new(frequency: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            channels: usize::from(channels.max(1)),
            sample_rate,
            step: TAU * frequency / sample_rate.max(1) as f32,
            phase: 0.0,
            amplitude: 0.8,
            frames_out: 0,
        }
    }

    /// Generated frames so far.
    pub fn frames(&self) -> u64 {
        self.frames_out
    }

    /// Media time of the end of the generated audio.
    pub fn end_time_us(&self) -> i64 {
        (self.frames_out as i64).saturating_mul(1_000_000) / i64::from(self.sample_rate.max(1))
    }

    /// Next `frames` frames as interleaved little-endian PCM16, same sample in every channel.
    pub fn next_chunk(&mut self, frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames * self.channels * 2);
        for _ in 0..frames {
            let sample = (self.phase.sin() * self.amplitude * f32::from(i16::MAX)) as i16;
            for _ in 0..self.channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
            self.phase = (self.phase + self.step) % TAU;
        }
        self.frames_out += frames as u64;
        out
    }
}
