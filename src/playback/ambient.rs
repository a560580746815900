use std::{f32::consts::TAU, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rodio::Source;

use crate::models::AmbientKind;

const SAMPLE_RATE: u32 = 44_100;

/// Binaural carrier pair used by the built-in focus track.
const BINAURAL_LEFT_HZ: f32 = 200.0;
const BINAURAL_RIGHT_HZ: f32 = 204.0;

pub type AmbientSource = Box<dyn Source<Item = f32> + Send>;

/// Endless generated source for a built-in ambient track.
pub fn ambient_source(kind: AmbientKind) -> AmbientSource {
    match kind {
        AmbientKind::BrownNoise => Box::new(BrownNoise::new()),
        AmbientKind::Rain => Box::new(Rain::new()),
        AmbientKind::Binaural => Box::new(Binaural::new(BINAURAL_LEFT_HZ, BINAURAL_RIGHT_HZ)),
    }
}

/// Leaky random walk: integrated white noise, pulled back towards zero.
struct NoiseWalk {
    rng: StdRng,
    value: f32,
}

impl NoiseWalk {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            value: 0.0,
        }
    }

    fn step(&mut self) -> f32 {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.value = ((self.value + white * 0.02).clamp(-1.0, 1.0)) * 0.9999;
        self.value
    }
}

pub struct BrownNoise {
    walk: NoiseWalk,
}

impl BrownNoise {
    pub fn new() -> Self {
        Self {
            walk: NoiseWalk::new(),
        }
    }
}

impl Iterator for BrownNoise {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.walk.step() * 0.3)
    }
}

/// Band-passed brown noise with a slow swell.
pub struct Rain {
    walk: NoiseWalk,
    inputs: [f32; 2],
    outputs: [f32; 2],
    swell_phase: f32,
}

impl Rain {
    const B0: f32 = 0.1;
    const B2: f32 = -0.1;
    const A1: f32 = -1.8;
    const A2: f32 = 0.85;
    const SWELL_HZ: f32 = 0.3 / TAU;

    pub fn new() -> Self {
        Self {
            walk: NoiseWalk::new(),
            inputs: [0.0; 2],
            outputs: [0.0; 2],
            swell_phase: 0.0,
        }
    }

    fn band_pass(&mut self, input: f32) -> f32 {
        let output = Self::B0 * input + Self::B2 * self.inputs[1]
            - Self::A1 * self.outputs[0]
            - Self::A2 * self.outputs[1];
        self.inputs = [input, self.inputs[0]];
        self.outputs = [output, self.outputs[0]];
        output
    }
}

impl Iterator for Rain {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let brown = self.walk.step();
        let filtered = self.band_pass(brown);

        self.swell_phase = (self.swell_phase + TAU * Self::SWELL_HZ / SAMPLE_RATE as f32) % TAU;
        let swell = 0.7 + 0.3 * self.swell_phase.sin();

        Some((filtered * 0.8 + brown * 0.2) * swell * 0.4)
    }
}

/// Two sine carriers, one per ear; their difference is the perceived beat.
pub struct Binaural {
    left_hz: f32,
    right_hz: f32,
    frame: u64,
    right_next: bool,
}

impl Binaural {
    pub fn new(left_hz: f32, right_hz: f32) -> Self {
        Self {
            left_hz,
            right_hz,
            frame: 0,
            right_next: false,
        }
    }
}

impl Iterator for Binaural {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        // Wrap once a second of frames so the phase keeps f32 precision.
        let t = (self.frame % u64::from(SAMPLE_RATE)) as f32 / SAMPLE_RATE as f32;
        let sample = if self.right_next {
            self.frame = self.frame.wrapping_add(1);
            (TAU * self.right_hz * t).sin()
        } else {
            (TAU * self.left_hz * t).sin()
        };
        self.right_next = !self.right_next;
        Some(sample * 0.15)
    }
}

macro_rules! endless_source {
    ($ty:ty, $channels:expr) => {
        impl Source for $ty {
            fn current_frame_len(&self) -> Option<usize> {
                None
            }

            fn channels(&self) -> u16 {
                $channels
            }

            fn sample_rate(&self) -> u32 {
                SAMPLE_RATE
            }

            fn total_duration(&self) -> Option<Duration> {
                None
            }
        }
    };
}

endless_source!(BrownNoise, 1);
endless_source!(Rain, 1);
endless_source!(Binaural, 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_stay_in_range() {
        for kind in [AmbientKind::BrownNoise, AmbientKind::Rain, AmbientKind::Binaural] {
            let source = ambient_source(kind);
            assert!(source.total_duration().is_none());
            for sample in source.take(44_100) {
                assert!(sample.is_finite() && sample.abs() <= 1.0, "{kind:?}: {sample}");
            }
        }
    }

    #[test]
    fn binaural_interleaves_two_channels() {
        let beats = Binaural::new(200.0, 204.0);
        assert_eq!(beats.channels(), 2);
        let first: Vec<f32> = beats.take(4).collect();
        // Both channels start at phase zero.
        assert_eq!(first[0], 0.0);
        assert_eq!(first[1], 0.0);
        assert!(first[2] > 0.0 && first[3] > 0.0);
    }
}
