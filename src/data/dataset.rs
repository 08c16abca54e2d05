//! Generic keyed, time-indexed multi-stream store.
//!
//! A [`DataSet`] maps keys to chronologically ordered streams. Each stream
//! maps a timestamp to one *or more* elements, so many entries can share an
//! epoch (e.g. several satellites observed at the same time) and are
//! disambiguated by element index. Timestamps compare bit-exactly within a
//! stream.
//!
//! All queries are read-only and O(log n) on the stream size; range
//! enumerations are additionally linear in the number of returned elements.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;

use crate::core::types::Time;
use crate::error::{FusionError, Result};

/// Keyed multi-stream store of timestamped objects.
#[derive(Debug, Clone)]
pub struct DataSet<K: Ord + Clone + Debug, V> {
    streams: BTreeMap<K, BTreeMap<Time, Vec<V>>>,
}

impl<K: Ord + Clone + Debug, V> Default for DataSet<K, V> {
    fn default() -> Self {
        Self {
            streams: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone + Debug, V> DataSet<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(key: &K, time: f64, what: &'static str) -> FusionError {
        FusionError::NotFound {
            key: format!("{key:?}"),
            time,
            what,
        }
    }

    /// Append an element. Duplicates at the same timestamp coexist as
    /// additional elements, in insertion order.
    pub fn add(&mut self, key: K, time: f64, value: V) {
        self.streams
            .entry(key)
            .or_default()
            .entry(Time(time))
            .or_default()
            .push(value);
    }

    /// Remove one element (by index) or all elements at a timestamp.
    /// The key itself is dropped once its stream becomes empty.
    pub fn remove(&mut self, key: &K, time: f64, index: Option<usize>) -> Result<()> {
        let stream = self
            .streams
            .get_mut(key)
            .ok_or_else(|| Self::not_found(key, time, "key"))?;
        let entries = stream
            .get_mut(&Time(time))
            .ok_or_else(|| Self::not_found(key, time, "timestamp"))?;

        match index {
            Some(i) => {
                if i >= entries.len() {
                    return Err(Self::not_found(key, time, "element index"));
                }
                entries.remove(i);
            }
            None => entries.clear(),
        }

        if entries.is_empty() {
            stream.remove(&Time(time));
        }
        if stream.is_empty() {
            self.streams.remove(key);
        }
        Ok(())
    }

    /// Total number of elements stored under a key.
    pub fn count(&self, key: &K) -> usize {
        self.streams
            .get(key)
            .map(|s| s.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of elements at one timestamp.
    pub fn count_at(&self, key: &K, time: f64) -> usize {
        self.streams
            .get(key)
            .and_then(|s| s.get(&Time(time)))
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn exists(&self, key: &K, time: f64, index: usize) -> bool {
        self.count_at(key, time) > index
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.streams.contains_key(key)
    }

    /// Reference to the `index`-th element at `(key, time)`.
    pub fn get(&self, key: &K, time: f64, index: usize) -> Result<&V> {
        self.streams
            .get(key)
            .and_then(|s| s.get(&Time(time)))
            .and_then(|v| v.get(index))
            .ok_or_else(|| Self::not_found(key, time, "element"))
    }

    pub fn get_mut(&mut self, key: &K, time: f64, index: usize) -> Result<&mut V> {
        self.streams
            .get_mut(key)
            .and_then(|s| s.get_mut(&Time(time)))
            .and_then(|v| v.get_mut(index))
            .ok_or_else(|| Self::not_found(key, time, "element"))
    }

    /// Replace an existing element.
    pub fn set(&mut self, key: &K, time: f64, index: usize, value: V) -> Result<()> {
        *self.get_mut(key, time, index)? = value;
        Ok(())
    }

    fn stream(&self, key: &K) -> Option<&BTreeMap<Time, Vec<V>>> {
        self.streams.get(key)
    }

    /// Earliest timestamp of a key.
    pub fn first_time(&self, key: &K) -> Option<f64> {
        self.stream(key)?.keys().next().map(|t| t.0)
    }

    /// Latest timestamp of a key.
    pub fn last_time(&self, key: &K) -> Option<f64> {
        self.stream(key)?.keys().next_back().map(|t| t.0)
    }

    /// Earliest timestamp across all keys.
    pub fn first_time_overall(&self) -> Option<f64> {
        self.streams
            .values()
            .filter_map(|s| s.keys().next())
            .min()
            .map(|t| t.0)
    }

    /// Next distinct timestamp after `time`. Requires an element at `time`.
    pub fn next_time(&self, key: &K, time: f64) -> Option<f64> {
        if self.count_at(key, time) == 0 {
            return None;
        }
        self.above(key, time)
    }

    /// Previous distinct timestamp before `time`. Requires an element at `time`.
    pub fn prev_time(&self, key: &K, time: f64) -> Option<f64> {
        if self.count_at(key, time) == 0 {
            return None;
        }
        self.below(key, time)
    }

    /// Smallest stored timestamp strictly greater than `time`.
    pub fn above(&self, key: &K, time: f64) -> Option<f64> {
        self.stream(key)?
            .range((Bound::Excluded(Time(time)), Bound::Unbounded))
            .next()
            .map(|(t, _)| t.0)
    }

    /// Smallest stored timestamp greater than or equal to `time`.
    pub fn above_or_equal(&self, key: &K, time: f64) -> Option<f64> {
        self.stream(key)?
            .range((Bound::Included(Time(time)), Bound::Unbounded))
            .next()
            .map(|(t, _)| t.0)
    }

    /// Largest stored timestamp strictly less than `time`.
    pub fn below(&self, key: &K, time: f64) -> Option<f64> {
        self.stream(key)?
            .range((Bound::Unbounded, Bound::Excluded(Time(time))))
            .next_back()
            .map(|(t, _)| t.0)
    }

    /// Largest stored timestamp less than or equal to `time`. Prefers the
    /// equal element when present.
    pub fn below_or_equal(&self, key: &K, time: f64) -> Option<f64> {
        self.stream(key)?
            .range((Bound::Unbounded, Bound::Included(Time(time))))
            .next_back()
            .map(|(t, _)| t.0)
    }

    /// Stored timestamp closest to `time`. Returns the newer one when the
    /// distances are equal.
    pub fn closest(&self, key: &K, time: f64) -> Option<f64> {
        let upper = self.above_or_equal(key, time);
        let lower = self.below(key, time);
        match (lower, upper) {
            (Some(lo), Some(hi)) => {
                if hi - time <= time - lo {
                    Some(hi)
                } else {
                    Some(lo)
                }
            }
            (Some(lo), None) => Some(lo),
            (None, Some(hi)) => Some(hi),
            (None, None) => None,
        }
    }

    /// All elements of a key in `[t0, t1]`, ascending in time, inclusive on
    /// both ends after snapping to the nearest stored timestamps inside the
    /// interval. Empty when no element lies in range.
    pub fn elements_between(&self, key: &K, t0: f64, t1: f64) -> Vec<&V> {
        let (Some(start), Some(end)) = (self.above_or_equal(key, t0), self.below_or_equal(key, t1))
        else {
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }
        self.stream(key)
            .map(|s| {
                s.range(Time(start)..=Time(end))
                    .flat_map(|(_, v)| v.iter())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All elements of a key in time order.
    pub fn elements_of(&self, key: &K) -> Vec<&V> {
        self.stream(key)
            .map(|s| s.values().flat_map(|v| v.iter()).collect())
            .unwrap_or_default()
    }

    /// Distinct timestamps of a key in ascending order.
    pub fn times_of(&self, key: &K) -> Vec<f64> {
        self.stream(key)
            .map(|s| s.keys().map(|t| t.0).collect())
            .unwrap_or_default()
    }

    /// Distinct timestamps in `[t0, t1]` after snapping, ascending.
    pub fn times_between(&self, key: &K, t0: f64, t1: f64) -> Vec<f64> {
        let (Some(start), Some(end)) = (self.above_or_equal(key, t0), self.below_or_equal(key, t1))
        else {
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }
        self.stream(key)
            .map(|s| s.range(Time(start)..=Time(end)).map(|(t, _)| t.0).collect())
            .unwrap_or_default()
    }

    /// Distinct timestamps up to and including the snap-down of `time`.
    pub fn times_below_or_equal(&self, key: &K, time: f64) -> Vec<f64> {
        match self.below_or_equal(key, time) {
            Some(end) => self.times_between(key, f64::NEG_INFINITY, end),
            None => Vec::new(),
        }
    }

    /// Keys that have at least one element at `time`.
    pub fn keys_at(&self, time: f64) -> Vec<K> {
        self.streams
            .iter()
            .filter(|(_, s)| s.contains_key(&Time(time)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// All keys in order.
    pub fn keys_all(&self) -> Vec<K> {
        self.streams.keys().cloned().collect()
    }

    /// Move every element of `other` into this store.
    pub fn merge(&mut self, other: DataSet<K, V>) {
        for (key, stream) in other.streams {
            for (time, values) in stream {
                for value in values {
                    self.add(key.clone(), time.0, value);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    /// Iterate over `(key, time, element)` triples in key and time order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, f64, &V)> {
        self.streams.iter().flat_map(|(k, s)| {
            s.iter()
                .flat_map(move |(t, vs)| vs.iter().map(move |v| (k, t.0, v)))
        })
    }
}
