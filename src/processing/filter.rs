//! Butterworth filtering as cascaded second-order sections
//!
//! Designs are the bilinear transform of the analog Butterworth prototype
//! with the cutoff prewarped, split into biquads (one per conjugate pole
//! pair). `filtfilt` runs the cascade forward then backward for zero phase,
//! with odd-reflection padding and steady-state initial conditions so the
//! edges do not ring.

use std::f64::consts::PI;

use super::ProcessingError;

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

/// One second-order section, normalised so `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Section with quality factor `q` at normalised angular cutoff `w0`.
    fn design(kind: FilterKind, w0: f64, q: f64) -> Self {
        let (sin_w, cos_w) = w0.sin_cos();
        let alpha = sin_w / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let k = (1.0 - cos_w) / 2.0;
                (k, 1.0 - cos_w, k)
            }
            FilterKind::HighPass => {
                let k = (1.0 + cos_w) / 2.0;
                (k, -(1.0 + cos_w), k)
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Gain at 0 Hz.
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Direct form II transposed state that a constant input `x` settles to.
    fn steady_state(&self, x: f64) -> [f64; 2] {
        let y = self.dc_gain() * x;
        [
            (self.b1 + self.b2) * x - (self.a1 + self.a2) * y,
            self.b2 * x - self.a2 * y,
        ]
    }

    /// Filter `data` in place starting from state `z`.
    fn run(&self, data: &mut [f64], mut z: [f64; 2]) {
        for v in data.iter_mut() {
            let x = *v;
            let y = self.b0 * x + z[0];
            z[0] = self.b1 * x - self.a1 * y + z[1];
            z[1] = self.b2 * x - self.a2 * y;
            *v = y;
        }
    }
}

/// Even-order Butterworth filter as a biquad cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Butterworth {
    kind: FilterKind,
    sections: Vec<Biquad>,
}

impl Butterworth {
    pub fn new(
        kind: FilterKind,
        order: usize,
        cutoff_hz: f64,
        sample_rate_hz: f64,
    ) -> Result<Self, ProcessingError> {
        if order == 0 || order % 2 != 0 {
            return Err(ProcessingError::InvalidFilter(format!(
                "order must be a positive even number, got {order}"
            )));
        }
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(ProcessingError::InvalidSamplingRate(sample_rate_hz));
        }
        let nyquist = sample_rate_hz / 2.0;
        if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 || cutoff_hz >= nyquist {
            return Err(ProcessingError::InvalidFilter(format!(
                "cutoff {cutoff_hz} Hz must lie in (0, {nyquist}) Hz"
            )));
        }

        let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
        let sections = (0..order / 2)
            .map(|k| {
                // Analog pole pair angle; Q = 1 / (2 sin(phi))
                let phi = PI * (2 * k + 1) as f64 / (2 * order) as f64;
                Biquad::design(kind, w0, 1.0 / (2.0 * phi.sin()))
            })
            .collect();

        Ok(Self { kind, sections })
    }

    pub fn lowpass(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self, ProcessingError> {
        Self::new(FilterKind::LowPass, order, cutoff_hz, sample_rate_hz)
    }

    pub fn highpass(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self, ProcessingError> {
        Self::new(FilterKind::HighPass, order, cutoff_hz, sample_rate_hz)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Causal pass with steady-state initial conditions scaled to `data[0]`.
    fn pass(&self, data: &mut [f64]) {
        let Some(&first) = data.first() else {
            return;
        };
        let mut level = first;
        for section in &self.sections {
            section.run(data, section.steady_state(level));
            level *= section.dc_gain();
        }
    }

    /// Single forward pass (introduces phase delay).
    pub fn filter(&self, data: &[f64]) -> Vec<f64> {
        let mut out = data.to_vec();
        self.pass(&mut out);
        out
    }

    /// Zero-phase forward-backward filtering.
    pub fn filtfilt(&self, data: &[f64]) -> Vec<f64> {
        let n = data.len();
        if n < 2 {
            return data.to_vec();
        }

        let pad = (3 * (2 * self.sections.len() + 1)).min(n - 1);
        let (first, last) = (data[0], data[n - 1]);

        // Odd reflection about the end points
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
        ext.extend_from_slice(data);
        ext.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));

        self.pass(&mut ext);
        ext.reverse();
        self.pass(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
    }

    #[test]
    fn test_second_order_q_is_butterworth() {
        let f = Butterworth::lowpass(2, 10.0, 100.0).unwrap();
        assert_eq!(f.sections().len(), 1);
        // Unity DC gain for a low-pass
        assert!((f.sections()[0].dc_gain() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let f = Butterworth::highpass(4, 0.2, 50.0).unwrap();
        let out = f.filtfilt(&vec![1.0; 2000]);
        assert!(out.iter().all(|v| v.abs() < 1e-9), "constant input should vanish");
    }

    #[test]
    fn test_lowpass_keeps_constant() {
        let f = Butterworth::lowpass(4, 20.0, 100.0).unwrap();
        let out = f.filtfilt(&vec![0.98; 500]);
        assert!(out.iter().all(|v| (v - 0.98).abs() < 1e-9));
    }

    #[test]
    fn test_lowpass_attenuates_above_cutoff() {
        let fs = 100.0;
        let f = Butterworth::lowpass(4, 20.0, fs).unwrap();
        let pass = f.filtfilt(&sine(2.0, fs, 4000));
        let stop = f.filtfilt(&sine(45.0, fs, 4000));
        assert!(rms(&pass[500..3500]) > 0.69);
        assert!(rms(&stop[500..3500]) < 0.01);
    }

    #[test]
    fn test_filtfilt_has_no_phase_shift() {
        let fs = 100.0;
        let input = sine(1.0, fs, 3000);
        let out = Butterworth::lowpass(4, 20.0, fs).unwrap().filtfilt(&input);
        for i in 1000..2000 {
            assert!((out[i] - input[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_rejects_cutoff_above_nyquist() {
        assert!(Butterworth::lowpass(4, 20.0, 30.0).is_err());
        assert!(Butterworth::lowpass(3, 5.0, 30.0).is_err());
    }

    #[test]
    fn test_short_input_passes_through() {
        let f = Butterworth::lowpass(4, 20.0, 100.0).unwrap();
        assert_eq!(f.filtfilt(&[1.5]), vec![1.5]);
        assert!(f.filtfilt(&[]).is_empty());
    }
}
