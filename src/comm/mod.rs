/*
    Lachesis, onboard model-based prognostics
    Copyright (C) 2026 Lachesis Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::estimate::EstimateRecord;
use crate::linalg::DVector;
use crate::predict::Prediction;
use crate::time::Epoch;
use serde_derive::{Deserialize, Serialize};
use std::sync::Mutex;

/// One sensor sample: the applied inputs and the measured outputs at a given
/// epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub epoch: Epoch,
    pub inputs: DVector<f64>,
    pub outputs: DVector<f64>,
}

/// What the prognoser publishes after a cycle: the current estimate record
/// and, on prediction cycles, the freshly computed event time distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgOutput {
    pub estimate: EstimateRecord,
    pub prediction: Option<Prediction>,
}

/// The transport boundary of the engine.
///
/// The cycle thread polls and publishes while the I/O side produces samples
/// concurrently, so implementations must make `poll` atomic with respect to
/// their writers; [LatestValueCell] is the standard building block. `poll`
/// never blocks and returns the newest sample or nothing; the engine never
/// asks for a backlog.
pub trait Communicator: Send + Sync {
    /// The newest available sample, if any. Consuming: a sample is returned
    /// at most once.
    fn poll(&self) -> Option<Sample>;

    /// Hands a cycle result to the transport.
    fn publish(&self, output: &ProgOutput);
}

/// A single-slot synchronized latest-value cell.
///
/// Writers always succeed and displace whatever was there: the drop-oldest
/// policy the engine relies on for backpressure. `take` atomically consumes
/// the newest value.
#[derive(Debug, Default)]
pub struct LatestValueCell<T> {
    slot: Mutex<Option<T>>,
}

impl<T> LatestValueCell<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replaces the stored value, returning the displaced one if the reader
    /// had not caught up.
    pub fn offer(&self, value: T) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        slot.replace(value)
    }

    /// Takes the newest value, leaving the cell empty.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        slot.take()
    }

    /// Whether a value is currently pending.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

#[test]
fn test_cell_drops_oldest() {
    let cell = LatestValueCell::new();
    assert!(cell.offer(1).is_none());
    // Writer outpaces the reader: the older value is displaced.
    assert_eq!(cell.offer(2), Some(1));
    assert_eq!(cell.take(), Some(2));
    assert_eq!(cell.take(), None);
    assert!(!cell.is_pending());
}

#[test]
fn test_cell_concurrent_newest_wins() {
    use std::sync::Arc;
    use std::thread;

    let cell = Arc::new(LatestValueCell::new());
    let writer = {
        let cell = cell.clone();
        thread::spawn(move || {
            for i in 0..1000 {
                cell.offer(i);
            }
        })
    };

    // The reader only ever observes monotonically increasing values: stale
    // samples are dropped, never re-ordered.
    let mut last_seen = -1;
    while !writer.is_finished() {
        if let Some(v) = cell.take() {
            assert!(v > last_seen);
            last_seen = v;
        }
    }
    writer.join().unwrap();
    if let Some(v) = cell.take() {
        assert!(v > last_seen);
    }
}
