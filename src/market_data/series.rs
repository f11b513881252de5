use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::candle::{Candle, PricePolicy, RawCandle};

// ---------------------------------------------------------------------------
// CandleSeries -- ordered candles for one symbol
// ---------------------------------------------------------------------------

/// Result of merging one candle into a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// Same time bucket as the tail: the in-progress bar was overwritten.
    Replaced,
    /// Older than the tail; dropped.
    Discarded,
}

/// Time-ordered candles with at most one candle per `time`. Once the
/// optional cap is exceeded the oldest candle is evicted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    max_len: Option<usize>,
}

impl CandleSeries {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            candles: VecDeque::new(),
            max_len,
        }
    }

    /// Merge a live candle into the tail of the series.
    ///
    /// * empty series or newer time -> append (then trim to the cap)
    /// * same time as the tail -> replace the tail
    /// * older than the tail -> discard; earlier bars are never rewritten
    pub fn merge(&mut self, candle: Candle) -> MergeOutcome {
        let outcome = match self.candles.back() {
            None => MergeOutcome::Appended,
            Some(last) if candle.time == last.time => MergeOutcome::Replaced,
            Some(last) if candle.time < last.time => MergeOutcome::Discarded,
            Some(_) => MergeOutcome::Appended,
        };

        match outcome {
            MergeOutcome::Appended => {
                self.candles.push_back(candle);
                self.trim();
            }
            MergeOutcome::Replaced => {
                if let Some(last) = self.candles.back_mut() {
                    *last = candle;
                }
            }
            MergeOutcome::Discarded => {}
        }
        outcome
    }

    /// Build a series from an unordered backfill batch.
    ///
    /// Rejected candles are skipped and counted. Survivors are sorted by time
    /// (stable), duplicate times collapse to the last one in feed order, and
    /// only the newest `max_len` candles are kept.
    pub fn from_batch<'a>(
        raw: impl IntoIterator<Item = &'a RawCandle>,
        policy: PricePolicy,
        max_len: Option<usize>,
    ) -> (Self, usize) {
        let mut rejected = 0usize;
        let mut candles: Vec<Candle> = raw
            .into_iter()
            .filter_map(|r| match r.normalize(policy) {
                Ok(c) => Some(c),
                Err(e) => {
                    debug!(reason = %e, "dropping malformed history candle");
                    rejected += 1;
                    None
                }
            })
            .collect();

        candles.sort_by_key(|c| c.time);

        let mut deduped: VecDeque<Candle> = VecDeque::with_capacity(candles.len());
        for c in candles {
            match deduped.back_mut() {
                Some(last) if last.time == c.time => *last = c,
                _ => deduped.push_back(c),
            }
        }

        let mut series = Self {
            candles: deduped,
            max_len,
        };
        series.trim();
        (series, rejected)
    }

    fn trim(&mut self) {
        if let Some(max) = self.max_len {
            while self.candles.len() > max {
                self.candles.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Owned copy, oldest first.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.iter().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// SeriesStore -- thread-safe map symbol -> series
// ---------------------------------------------------------------------------

/// All series of the current game, keyed by symbol.
pub struct SeriesStore {
    series: RwLock<HashMap<String, CandleSeries>>,
    max_len: Option<usize>,
    policy: PricePolicy,
}

impl SeriesStore {
    pub fn new(max_len: Option<usize>, policy: PricePolicy) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_len,
            policy,
        }
    }

    /// Replace the series for `symbol` with a backfill batch. Returns the new
    /// series contents.
    pub fn replace_history(&self, symbol: &str, batch: &[RawCandle]) -> Vec<Candle> {
        let (series, rejected) = CandleSeries::from_batch(batch, self.policy, self.max_len);
        if series.is_empty() && !batch.is_empty() {
            warn!(symbol = %symbol, received = batch.len(), "history batch had no usable candles");
        } else if rejected > 0 {
            warn!(
                symbol = %symbol,
                rejected,
                kept = series.len(),
                "history batch contained malformed candles"
            );
        }
        let snapshot = series.to_vec();
        self.series.write().insert(symbol.to_string(), series);
        snapshot
    }

    /// Normalize and merge a single live candle. Returns the merge outcome
    /// and the series contents when the series changed; `None` when the
    /// candle was rejected by the normalizer.
    pub fn apply_tick(
        &self,
        symbol: &str,
        raw: &RawCandle,
    ) -> Option<(MergeOutcome, Option<Vec<Candle>>)> {
        let candle = match raw.normalize(self.policy) {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol = %symbol, reason = %e, "dropping malformed live candle");
                return None;
            }
        };

        let mut map = self.series.write();
        let series = map
            .entry(symbol.to_string())
            .or_insert_with(|| CandleSeries::new(self.max_len));

        let outcome = series.merge(candle);
        if outcome == MergeOutcome::Discarded {
            debug!(symbol = %symbol, time = candle.time, "late candle discarded");
            return Some((outcome, None));
        }
        Some((outcome, Some(series.to_vec())))
    }

    pub fn get(&self, symbol: &str) -> Vec<Candle> {
        self.series
            .read()
            .get(symbol)
            .map(CandleSeries::to_vec)
            .unwrap_or_default()
    }

    pub fn last(&self, symbol: &str) -> Option<Candle> {
        self.series.read().get(symbol).and_then(|s| s.last().copied())
    }

    /// Number of candles per symbol.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.series
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    pub fn clear(&self) {
        self.series.write().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
