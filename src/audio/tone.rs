use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;

/// Alarm beep pattern: bursts of short sine beeps separated by a pause.
/// Finite, so a stuck sink never rings forever.
pub struct AlarmTone {
    freq: f32,
    sample_rate: u32,
    num_sample: usize,
    beep_samples: usize,
    gap_samples: usize,
    beeps_per_burst: usize,
    pause_samples: usize,
    total_samples: usize,
}

impl AlarmTone {
    pub fn new(freq: f32, bursts: usize) -> Self {
        let samples = |ms: usize| SAMPLE_RATE as usize * ms / 1000;
        let beep_samples = samples(180);
        let gap_samples = samples(120);
        let beeps_per_burst = 4;
        let pause_samples = samples(600);
        let burst_samples = beeps_per_burst * (beep_samples + gap_samples) + pause_samples;
        Self {
            freq,
            sample_rate: SAMPLE_RATE,
            num_sample: 0,
            beep_samples,
            gap_samples,
            beeps_per_burst,
            pause_samples,
            total_samples: burst_samples * bursts,
        }
    }

    fn burst_len(&self) -> usize {
        self.beeps_per_burst * (self.beep_samples + self.gap_samples) + self.pause_samples
    }

    fn is_sounding(&self, index: usize) -> bool {
        let in_burst = index % self.burst_len();
        let beeps_len = self.beeps_per_burst * (self.beep_samples + self.gap_samples);
        in_burst < beeps_len && in_burst % (self.beep_samples + self.gap_samples) < self.beep_samples
    }
}

impl Default for AlarmTone {
    fn default() -> Self {
        Self::new(880.0, 5)
    }
}

impl Iterator for AlarmTone {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }
        let index = self.num_sample;
        self.num_sample += 1;

        if !self.is_sounding(index) {
            return Some(0.0);
        }
        let t = index as f32 / self.sample_rate as f32;
        Some((2.0 * PI * self.freq * t).sin() * 0.4)
    }
}

impl Source for AlarmTone {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples - self.num_sample)
    }

    fn channels(&self) -> u16 {
        1 // Mono
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let millis = self.total_samples as u64 * 1000 / u64::from(self.sample_rate);
        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_is_finite() {
        let tone = AlarmTone::new(880.0, 2);
        let expected = tone.total_samples;
        assert_eq!(tone.count(), expected);
    }

    #[test]
    fn gaps_are_silent() {
        let tone = AlarmTone::new(880.0, 1);
        let beep = tone.beep_samples;
        let samples: Vec<f32> = tone.collect();
        assert!(samples[..beep].iter().any(|s| s.abs() > 0.1));
        assert!(samples[beep..beep + 100].iter().all(|s| *s == 0.0));
        assert!(samples.iter().all(|s| s.abs() <= 0.4));
    }

    #[test]
    fn reports_duration() {
        let tone = AlarmTone::new(880.0, 1);
        // 4 x (180 + 120) ms of beeps plus a 600 ms pause.
        assert_eq!(tone.total_duration(), Some(Duration::from_millis(1800)));
    }
}
