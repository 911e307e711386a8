//! Fixed-bucket request duration histogram.

/// Upper-bounded duration buckets, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DurationBucket {
    Le10,
    Le25,
    Le50,
    Le100,
    Le200,
    Le500,
    Le1000,
    Le2000,
    Le5000,
    /// Anything slower than five seconds.
    Overflow,
}

impl DurationBucket {
    /// All buckets in ascending order.
    pub const ALL: [DurationBucket; 10] = [
        DurationBucket::Le10,
        DurationBucket::Le25,
        DurationBucket::Le50,
        DurationBucket::Le100,
        DurationBucket::Le200,
        DurationBucket::Le500,
        DurationBucket::Le1000,
        DurationBucket::Le2000,
        DurationBucket::Le5000,
        DurationBucket::Overflow,
    ];

    /// Inclusive upper bound in milliseconds, `None` for the overflow bucket.
    pub const fn upper_bound_ms(self) -> Option<u32> {
        match self {
            DurationBucket::Le10 => Some(10),
            DurationBucket::Le25 => Some(25),
            DurationBucket::Le50 => Some(50),
            DurationBucket::Le100 => Some(100),
            DurationBucket::Le200 => Some(200),
            DurationBucket::Le500 => Some(500),
            DurationBucket::Le1000 => Some(1000),
            DurationBucket::Le2000 => Some(2000),
            DurationBucket::Le5000 => Some(5000),
            DurationBucket::Overflow => None,
        }
    }

    /// Representative duration used when averaging a histogram.
    pub const fn weight(self) -> f64 {
        match self.upper_bound_ms() {
            Some(bound) => bound as f64,
            None => 100_000.0,
        }
    }

    /// The bucket a duration falls into. Non-finite durations overflow.
    pub fn for_millis(millis: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|bucket| match bucket.upper_bound_ms() {
                Some(bound) => millis <= bound as f64,
                None => true,
            })
            .unwrap_or(DurationBucket::Overflow)
    }

    /// Label used in serialized output ("10", "25", ..., "Infinity").
    pub const fn label(self) -> &'static str {
        match self {
            DurationBucket::Le10 => "10",
            DurationBucket::Le25 => "25",
            DurationBucket::Le50 => "50",
            DurationBucket::Le100 => "100",
            DurationBucket::Le200 => "200",
            DurationBucket::Le500 => "500",
            DurationBucket::Le1000 => "1000",
            DurationBucket::Le2000 => "2000",
            DurationBucket::Le5000 => "5000",
            DurationBucket::Overflow => "Infinity",
        }
    }
}

/// Request counts per duration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DurationHistogram {
    #[cfg_attr(feature = "serde", serde(rename = "10"))]
    pub le_10: u64,
    #[cfg_attr(feature = "serde", serde(rename = "25"))]
    pub le_25: u64,
    #[cfg_attr(feature = "serde", serde(rename = "50"))]
    pub le_50: u64,
    #[cfg_attr(feature = "serde", serde(rename = "100"))]
    pub le_100: u64,
    #[cfg_attr(feature = "serde", serde(rename = "200"))]
    pub le_200: u64,
    #[cfg_attr(feature = "serde", serde(rename = "500"))]
    pub le_500: u64,
    #[cfg_attr(feature = "serde", serde(rename = "1000"))]
    pub le_1000: u64,
    #[cfg_attr(feature = "serde", serde(rename = "2000"))]
    pub le_2000: u64,
    #[cfg_attr(feature = "serde", serde(rename = "5000"))]
    pub le_5000: u64,
    #[cfg_attr(feature = "serde", serde(rename = "Infinity"))]
    pub overflow: u64,
}

impl DurationHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request that took `millis` milliseconds.
    pub fn record(&mut self, millis: f64) {
        *self.slot_mut(DurationBucket::for_millis(millis)) += 1;
    }

    /// Add `count` requests to a bucket.
    pub fn add(&mut self, bucket: DurationBucket, count: u64) {
        *self.slot_mut(bucket) += count;
    }

    /// Number of requests in a bucket.
    pub fn count(&self, bucket: DurationBucket) -> u64 {
        match bucket {
            DurationBucket::Le10 => self.le_10,
            DurationBucket::Le25 => self.le_25,
            DurationBucket::Le50 => self.le_50,
            DurationBucket::Le100 => self.le_100,
            DurationBucket::Le200 => self.le_200,
            DurationBucket::Le500 => self.le_500,
            DurationBucket::Le1000 => self.le_1000,
            DurationBucket::Le2000 => self.le_2000,
            DurationBucket::Le5000 => self.le_5000,
            DurationBucket::Overflow => self.overflow,
        }
    }

    /// Iterate `(bucket, count)` pairs in ascending bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (DurationBucket, u64)> + '_ {
        DurationBucket::ALL
            .into_iter()
            .map(move |bucket| (bucket, self.count(bucket)))
    }

    /// Total number of recorded requests.
    pub fn total(&self) -> u64 {
        self.iter().map(|(_, count)| count).sum()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Average duration estimated from bucket weights, 0 when empty.
    ///
    /// Each bucket counts at its upper bound; the overflow bucket counts as
    /// 100 seconds so that a handful of stuck requests dominates the result.
    pub fn weighted_average(&self) -> f64 {
        let (count, value) = self.iter().fold((0u64, 0.0f64), |(n, sum), (bucket, c)| {
            (n + c, sum + c as f64 * bucket.weight())
        });

        if count == 0 {
            0.0
        } else {
            value / count as f64
        }
    }

    fn slot_mut(&mut self, bucket: DurationBucket) -> &mut u64 {
        match bucket {
            DurationBucket::Le10 => &mut self.le_10,
            DurationBucket::Le25 => &mut self.le_25,
            DurationBucket::Le50 => &mut self.le_50,
            DurationBucket::Le100 => &mut self.le_100,
            DurationBucket::Le200 => &mut self.le_200,
            DurationBucket::Le500 => &mut self.le_500,
            DurationBucket::Le1000 => &mut self.le_1000,
            DurationBucket::Le2000 => &mut self.le_2000,
            DurationBucket::Le5000 => &mut self.le_5000,
            DurationBucket::Overflow => &mut self.overflow,
        }
    }
}
