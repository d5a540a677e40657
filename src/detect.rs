//! Heuristic check for 4-bytes-per-pixel data sitting in a 4:2:2 buffer.
//!
//! A raw read can land on a buffer the driver filled in a different
//! encoding. Opaque BGRA has a fourth lane pinned at `0xFF` with almost no
//! variance, while real 4:2:2 carries most of its variance in the two luma
//! lanes. Sampling is a fixed pseudo-spread over the frame, so the verdict
//! is a pure function of the bytes.

use crate::frame::FrameMetadata;

/// Tuning for [`CorruptionDetector`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorruptionThresholds {
    pub samples: usize,
    pub row_multiplier: usize,
    pub column_multiplier: usize,
    /// Fourth-lane saturation that is suspect on its own.
    pub alpha_saturation_absolute: f64,
    /// Fourth-lane saturation that is suspect when it also leads the
    /// other lanes by `alpha_bias`.
    pub alpha_saturation: f64,
    pub alpha_bias: f64,
    pub low_alpha_variance: f64,
    pub low_alpha_variance_saturation: f64,
    /// Luma variance below this fraction of chroma variance is suspect.
    pub luma_chroma_ratio: f64,
}

impl Default for CorruptionThresholds {
    fn default() -> Self {
        Self {
            samples: 2048,
            row_multiplier: 131,
            column_multiplier: 337,
            alpha_saturation_absolute: 0.35,
            alpha_saturation: 0.20,
            alpha_bias: 0.10,
            low_alpha_variance: 50.0,
            low_alpha_variance_saturation: 0.10,
            luma_chroma_ratio: 0.8,
        }
    }
}

/// Welford running mean/variance plus a count of saturated values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaneStats {
    count: usize,
    mean: f64,
    m2: f64,
    saturated: usize,
}

impl LaneStats {
    pub fn push(&mut self, value: u8) {
        if value == 0xFF {
            self.saturated += 1;
        }
        let x = f64::from(value);
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n - 1 denominator); zero below two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Fraction of samples equal to `0xFF`.
    pub fn saturation(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.saturated as f64 / self.count as f64
        }
    }
}

/// Scores behind one verdict, kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorruptionReport {
    pub lanes: [LaneStats; 4],
    /// Fourth-lane saturation minus the highest of the other three.
    pub alpha_bias: f64,
    pub luma_variance: f64,
    pub chroma_variance: f64,
    pub suspicious_alpha: bool,
    pub suspicious_variance: bool,
}

impl CorruptionReport {
    pub fn is_suspect(&self) -> bool {
        self.suspicious_alpha || self.suspicious_variance
    }

    pub fn saturation(&self) -> [f64; 4] {
        self.lanes.map(|lane| lane.saturation())
    }

    pub fn variance(&self) -> [f64; 4] {
        self.lanes.map(|lane| lane.variance())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CorruptionDetector {
    thresholds: CorruptionThresholds,
}

impl CorruptionDetector {
    pub fn new(thresholds: CorruptionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &CorruptionThresholds {
        &self.thresholds
    }

    /// Samples `pixels` laid out per `meta`.
    ///
    /// Returns `None` when the geometry leaves nothing to sample. Samples
    /// that would fall outside `pixels` are skipped.
    pub fn analyze(&self, pixels: &[u8], meta: &FrameMetadata) -> Option<CorruptionReport> {
        let t = &self.thresholds;
        let height = usize::try_from(meta.height).ok().filter(|h| *h > 0)?;
        let stride = usize::try_from(meta.row_stride).ok()?;
        let width_bytes = usize::try_from(meta.width).ok()?.checked_mul(2)?;
        let span = width_bytes.checked_sub(4).filter(|s| *s > 0)?;

        let mut lanes = [LaneStats::default(); 4];
        for i in 0..t.samples {
            let y = i.wrapping_mul(t.row_multiplier) % height;
            let x = (i.wrapping_mul(t.column_multiplier) % span) & !3;
            let Some(group) = y
                .checked_mul(stride)
                .and_then(|row| row.checked_add(x))
                .and_then(|offset| pixels.get(offset..offset.checked_add(4)?))
            else {
                continue;
            };
            for (lane, value) in lanes.iter_mut().zip(group) {
                lane.push(*value);
            }
        }
        if lanes[0].count() == 0 {
            return None;
        }

        let [p0, p1, p2, p3] = lanes.map(|lane| lane.saturation());
        let [v0, v1, v2, v3] = lanes.map(|lane| lane.variance());
        let alpha_bias = p3 - p0.max(p1).max(p2);
        let luma_variance = v1 + v3;
        let chroma_variance = v0 + v2;

        let suspicious_alpha = (p3 > t.alpha_saturation && alpha_bias > t.alpha_bias)
            || p3 > t.alpha_saturation_absolute;
        let suspicious_variance = (v3 < t.low_alpha_variance
            && p3 > t.low_alpha_variance_saturation)
            || luma_variance < chroma_variance * t.luma_chroma_ratio;

        Some(CorruptionReport {
            lanes,
            alpha_bias,
            luma_variance,
            chroma_variance,
            suspicious_alpha,
            suspicious_variance,
        })
    }

    pub fn is_suspect(&self, pixels: &[u8], meta: &FrameMetadata) -> bool {
        self.analyze(pixels, meta)
            .is_some_and(|report| report.is_suspect())
    }
}
