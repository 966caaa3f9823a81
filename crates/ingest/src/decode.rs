//! Sensor notification frame decoding.
//!
//! Vibration bursts: 512 samples of `x, y, z` little-endian `i16` at 4 mg/LSB,
//! delivered as arbitrary-sized notification chunks (3072 bytes per burst).
//! Environment frames: 6 bytes big-endian `i16 temp/100 °C`,
//! `i16 humidity/100 %RH`, `u16 pressure hPa`.

pub const SAMPLES_PER_BURST: usize = 512;
pub const BYTES_PER_SAMPLE: usize = 6;
pub const BURST_BYTES: usize = SAMPLES_PER_BURST * BYTES_PER_SAMPLE;
pub const ENV_FRAME_LEN: usize = 6;

/// Acceleration per LSB, in g.
const G_PER_LSB: f64 = 0.004;

/// RMS and peak acceleration magnitude of one burst, in g.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VibrationStats {
    pub rms: f64,
    pub peak: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentFrame {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// Reassembles burst chunks into complete bursts.
#[derive(Debug, Default)]
pub struct BurstAssembler {
    buf: Vec<u8>,
}

impl BurstAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(BURST_BYTES),
        }
    }

    /// Appends a chunk. Returns stats once a full burst has accumulated;
    /// bytes past the burst boundary are discarded with it.
    pub fn push(&mut self, chunk: &[u8]) -> Option<VibrationStats> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() < BURST_BYTES {
            return None;
        }
        let stats = compute_vibration(&self.buf[..BURST_BYTES]);
        self.buf.clear();
        Some(stats)
    }

    /// Bytes buffered toward the current burst.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Computes RMS and peak of the acceleration magnitude over whole samples in `data`.
pub fn compute_vibration(data: &[u8]) -> VibrationStats {
    let mut sum_sq = 0.0;
    let mut peak: f64 = 0.0;
    let mut n = 0usize;

    for s in data.chunks_exact(BYTES_PER_SAMPLE) {
        let x = f64::from(i16::from_le_bytes([s[0], s[1]])) * G_PER_LSB;
        let y = f64::from(i16::from_le_bytes([s[2], s[3]])) * G_PER_LSB;
        let z = f64::from(i16::from_le_bytes([s[4], s[5]])) * G_PER_LSB;
        let mag_sq = x * x + y * y + z * z;
        sum_sq += mag_sq;
        peak = peak.max(mag_sq.sqrt());
        n += 1;
    }

    if n == 0 {
        return VibrationStats::default();
    }
    VibrationStats {
        rms: round_to((sum_sq / n as f64).sqrt(), 4),
        peak: round_to(peak, 4),
    }
}

/// Parses an environment frame; frames shorter than 6 bytes yield `None`.
pub fn parse_environment(data: &[u8]) -> Option<EnvironmentFrame> {
    if data.len() < ENV_FRAME_LEN {
        return None;
    }
    let temp = i16::from_be_bytes([data[0], data[1]]);
    let hum = i16::from_be_bytes([data[2], data[3]]);
    let press = u16::from_be_bytes([data[4], data[5]]);
    Some(EnvironmentFrame {
        temperature: round_to(f64::from(temp) / 100.0, 2),
        humidity: round_to(f64::from(hum) / 100.0, 2),
        pressure: f64::from(press),
    })
}

/// Encodes raw `(x, y, z)` samples as a burst payload.
pub fn encode_burst(samples: &[(i16, i16, i16)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for (x, y, z) in samples {
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
        out.extend_from_slice(&z.to_le_bytes());
    }
    out
}

/// Encodes an environment frame. Temperature and humidity are clamped to the `i16` range.
pub fn encode_environment(temperature: f64, humidity: f64, pressure: u16) -> [u8; ENV_FRAME_LEN] {
    let t = (temperature * 100.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    let h = (humidity * 100.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    let mut out = [0u8; ENV_FRAME_LEN];
    out[0..2].copy_from_slice(&t.to_be_bytes());
    out[2..4].copy_from_slice(&h.to_be_bytes());
    out[4..6].copy_from_slice(&pressure.to_be_bytes());
    out
}

pub(crate) fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_z_axis_burst() {
        // 250 LSB = 1.0 g on every sample.
        let data = encode_burst(&vec![(0, 0, 250); SAMPLES_PER_BURST]);
        let stats = compute_vibration(&data);
        assert!((stats.rms - 1.0).abs() < 1e-9);
        assert!((stats.peak - 1.0).abs() < 1e-9);
    }

    #[test]
    fn magnitude_uses_all_axes() {
        // (3, 4, 0) * 0.004 -> magnitude 0.02 g
        let stats = compute_vibration(&encode_burst(&[(3, 4, 0)]));
        assert!((stats.rms - 0.02).abs() < 1e-9);
    }

    #[test]
    fn peak_tracks_largest_sample() {
        let stats = compute_vibration(&encode_burst(&[(0, 0, 100), (0, 0, -500), (0, 0, 0)]));
        assert!((stats.peak - 2.0).abs() < 1e-9);
        assert!(stats.rms < stats.peak);
    }

    #[test]
    fn empty_burst_is_zero() {
        assert_eq!(compute_vibration(&[]), VibrationStats::default());
        assert_eq!(compute_vibration(&[1, 2, 3]), VibrationStats::default());
    }

    #[test]
    fn assembler_waits_for_full_burst() {
        let data = encode_burst(&vec![(0, 0, 125); SAMPLES_PER_BURST]);
        let mut asm = BurstAssembler::new();

        let mut out = None;
        for chunk in data.chunks(244) {
            assert!(out.is_none(), "burst completed early");
            out = asm.push(chunk);
        }
        let stats = out.unwrap();
        assert!((stats.rms - 0.5).abs() < 1e-9);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn assembler_discards_overflow() {
        let mut data = encode_burst(&vec![(0, 0, 125); SAMPLES_PER_BURST]);
        data.extend_from_slice(&[0xFF; 10]);
        let mut asm = BurstAssembler::new();
        assert!(asm.push(&data).is_some());
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn parses_environment_frame() {
        // 24.31 C, 52.10 %RH, 1013 hPa
        let frame = [0x09, 0x7F, 0x14, 0x5A, 0x03, 0xF5];
        let env = parse_environment(&frame).unwrap();
        assert!((env.temperature - 24.31).abs() < 1e-9);
        assert!((env.humidity - 52.10).abs() < 1e-9);
        assert!((env.pressure - 1013.0).abs() < 1e-9);
    }

    #[test]
    fn negative_temperature() {
        let env = parse_environment(&encode_environment(-12.5, 40.0, 990)).unwrap();
        assert!((env.temperature + 12.5).abs() < 1e-9);
    }

    #[test]
    fn short_environment_frame_is_ignored() {
        assert!(parse_environment(&[0x09, 0x7F, 0x14]).is_none());
    }
}
