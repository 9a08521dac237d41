//! Bucketed trends over normalized samples
//!
//! Trend views over hour, day and week ranges are recomputed frequently while
//! most of their buckets never change. `TrendAggregator` memoizes closed
//! buckets in a bounded `ResultCache`; the bucket holding the newest sample is
//! always recomputed because it may still be filling.

use crate::stats;
use crate::types::{sorted_by_time, OpticalSample};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Fixed-capacity map that evicts the oldest inserted key
#[derive(Debug, Clone)]
pub struct ResultCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> ResultCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace; replacing keeps the key's original age
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Channel a trend is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    ChannelA,
    ChannelB,
    ChannelC,
}

impl TrendMetric {
    pub fn value(&self, sample: &OpticalSample) -> f64 {
        match self {
            Self::ChannelA => sample.channel_a,
            Self::ChannelB => sample.channel_b,
            Self::ChannelC => sample.channel_c,
        }
    }
}

/// Display range of a trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Hour,
    Day,
    Week,
}

impl TimeRange {
    pub fn span_secs(&self) -> i64 {
        match self {
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
        }
    }

    pub fn bucket_secs(&self) -> i64 {
        match self {
            Self::Hour => 60,
            Self::Day => 900,
            Self::Week => 3_600,
        }
    }

    /// Start of the bucket holding `timestamp`, aligned to the epoch
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.bucket_secs();
        let secs = timestamp.timestamp().div_euclid(width) * width;
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(timestamp)
    }
}

/// Mean of one metric over one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub value: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TrendKey {
    metric: TrendMetric,
    range: TimeRange,
    bucket_start: i64,
}

pub const DEFAULT_TREND_CACHE_CAPACITY: usize = 1_024;

/// Memoizing trend builder
#[derive(Debug, Clone)]
pub struct TrendAggregator {
    cache: ResultCache<TrendKey, TrendPoint>,
    hits: u64,
}

impl Default for TrendAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TREND_CACHE_CAPACITY)
    }
}

impl TrendAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: ResultCache::new(capacity),
            hits: 0,
        }
    }

    /// Number of buckets served from the cache so far
    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    pub fn cached_buckets(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.hits = 0;
    }

    /// Per-bucket means over the range ending at the newest sample
    ///
    /// `samples` are normalized output; order does not matter. Buckets with no
    /// samples are omitted.
    pub fn trend(
        &mut self,
        samples: &[OpticalSample],
        metric: TrendMetric,
        range: TimeRange,
    ) -> Vec<TrendPoint> {
        let sorted = sorted_by_time(samples, |s| s.timestamp);
        let latest = match sorted.last() {
            Some(last) => last.timestamp,
            None => return Vec::new(),
        };
        let cutoff = latest - Duration::seconds(range.span_secs());
        let open_bucket = range.bucket_start(latest);

        let first = sorted.partition_point(|s| s.timestamp <= cutoff);
        let in_range = &sorted[first..];

        let mut points = Vec::new();
        let mut start = 0;
        while start < in_range.len() {
            let bucket = range.bucket_start(in_range[start].timestamp);
            let len = in_range[start..]
                .iter()
                .take_while(|s| range.bucket_start(s.timestamp) == bucket)
                .count();
            let members = &in_range[start..start + len];
            start += len;

            let key = TrendKey {
                metric,
                range,
                bucket_start: bucket.timestamp(),
            };
            let closed = bucket < open_bucket;
            if closed {
                if let Some(point) = self.cache.get(&key) {
                    self.hits += 1;
                    points.push(*point);
                    continue;
                }
            }

            let values: Vec<f64> = members.iter().map(|s| metric.value(s)).collect();
            let point = TrendPoint {
                bucket_start: bucket,
                value: stats::mean(&values),
                sample_count: members.len(),
            };
            if closed {
                self.cache.insert(key, point);
            }
            points.push(point);
        }
        points
    }
}
