// Timestamp correction
//
// Maps stream-local timestamps onto the reference clock by adding the offset
// captured when the stream was attached and, optionally, replaces them with a
// least-squares line over the sample index. The fit only ever sees one flush
// batch, so the result depends on nothing but the batch itself.

/// Corrects the timestamps of one stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampCorrector {
    time_correction: f64,
    dejitter: bool,
}

impl TimestampCorrector {
    pub fn new(time_correction: f64, dejitter: bool) -> Self {
        Self {
            time_correction,
            dejitter,
        }
    }

    pub fn time_correction(&self) -> f64 {
        self.time_correction
    }

    /// Correct one batch of local timestamps
    pub fn correct(&self, local_timestamps: &[f64]) -> Vec<f64> {
        let corrected: Vec<f64> = local_timestamps
            .iter()
            .map(|ts| ts + self.time_correction)
            .collect();

        if self.dejitter {
            dejitter(&corrected)
        } else {
            corrected
        }
    }
}

/// Least-squares line `ts ≈ intercept + slope * index`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexFit {
    pub intercept: f64,
    pub slope: f64,
}

impl IndexFit {
    /// Fit a line through `(i, timestamps[i])`. Needs at least two points.
    pub fn fit(timestamps: &[f64]) -> Option<Self> {
        let n = timestamps.len();
        if n < 2 {
            return None;
        }

        // Centre both axes so large absolute clock values keep their precision
        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = timestamps.iter().sum::<f64>() / n as f64;

        let (sxy, sxx) = timestamps
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sxy, sxx), (i, y)| {
                let dx = i as f64 - x_mean;
                (sxy + dx * (y - y_mean), sxx + dx * dx)
            });

        let slope = sxy / sxx;
        Some(Self {
            intercept: y_mean - slope * x_mean,
            slope,
        })
    }

    pub fn at(&self, index: usize) -> f64 {
        self.intercept + self.slope * index as f64
    }
}

/// Replace timestamps with their evenly spaced least-squares fit.
///
/// Batches shorter than two samples are returned unchanged.
pub fn dejitter(timestamps: &[f64]) -> Vec<f64> {
    match IndexFit::fit(timestamps) {
        Some(fit) => (0..timestamps.len()).map(|i| fit.at(i)).collect(),
        None => timestamps.to_vec(),
    }
}
