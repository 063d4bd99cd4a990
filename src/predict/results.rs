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

use crate::time::Epoch;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// The outcome distribution of one predict call.
///
/// Each of the `sample_count` particles either produced an event epoch or was
/// censored at the horizon. Every particle carries the uniform weight
/// 1/sample_count, so the weights over outcomes plus the censored mass total
/// exactly 1. The collection is immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// The epoch this prediction was computed at.
    pub epoch: Epoch,
    /// (event epoch, weight) for every non-censored particle, in particle
    /// order.
    pub outcomes: Vec<(Epoch, f64)>,
    /// Number of particles that reached the horizon without any monitored
    /// event firing.
    pub censored: usize,
    /// Number of particles that were drawn.
    pub sample_count: usize,
    /// Seed the run was drawn with.
    pub seed: u64,
}

impl Prediction {
    /// Fraction of particles censored at the horizon.
    pub fn censored_fraction(&self) -> f64 {
        self.censored as f64 / self.sample_count as f64
    }

    /// Total probability mass of the outcome set (1 - censored mass).
    pub fn total_weight(&self) -> f64 {
        self.outcomes.iter().map(|(_, w)| w).sum()
    }

    /// The weighted quantile of the outcome epochs, renormalized over the
    /// non-censored mass. Returns None when every particle was censored.
    pub fn quantile(&self, q: f64) -> Option<Epoch> {
        if self.outcomes.is_empty() {
            return None;
        }
        let mut sorted = self.outcomes.clone();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let total: f64 = sorted.iter().map(|(_, w)| w).sum();
        let target = q.clamp(0.0, 1.0) * total;
        let mut acc = 0.0;
        for (epoch, weight) in &sorted {
            acc += weight;
            if acc >= target {
                return Some(*epoch);
            }
        }
        sorted.last().map(|(epoch, _)| *epoch)
    }

    /// The median predicted event epoch, if any particle produced one.
    pub fn median(&self) -> Option<Epoch> {
        self.quantile(0.5)
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.median() {
            Some(median) => write!(
                f,
                "prediction @ {}: median event time {}, {} of {} particles censored",
                self.epoch, median, self.censored, self.sample_count
            ),
            None => write!(
                f,
                "prediction @ {}: no event within horizon ({} particles censored)",
                self.epoch, self.censored
            ),
        }
    }
}

#[test]
fn test_quantiles() {
    let epoch = Epoch::from_tai_seconds(0.0);
    let outcomes: Vec<(Epoch, f64)> = (1..=4)
        .map(|i| (Epoch::from_tai_seconds(i as f64), 0.2))
        .collect();
    let prediction = Prediction {
        epoch,
        outcomes,
        censored: 1,
        sample_count: 5,
        seed: 0,
    };
    assert_eq!(prediction.censored_fraction(), 0.2);
    assert!((prediction.total_weight() - 0.8).abs() < 1e-12);
    assert_eq!(prediction.median(), Some(Epoch::from_tai_seconds(2.0)));
    assert_eq!(prediction.quantile(1.0), Some(Epoch::from_tai_seconds(4.0)));
    assert_eq!(prediction.quantile(0.0), Some(Epoch::from_tai_seconds(1.0)));

    let empty = Prediction {
        epoch,
        outcomes: Vec::new(),
        censored: 5,
        sample_count: 5,
        seed: 0,
    };
    assert_eq!(empty.median(), None);
}
