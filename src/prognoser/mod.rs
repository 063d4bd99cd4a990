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

use crate::comm::{Communicator, ProgOutput};
use crate::io::{ConfigError, ProgConfig};
use crate::model::Model;
use crate::observers::Observer;
use crate::predict::{ConstantLoad, Predictor};
use crate::registry::Registry;
use snafu::prelude::*;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration as StdDuration, Instant};

/// The externally visible lifecycle of a prognoser.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing wired; only `enable` is legal.
    Idle,
    /// Components wired and validated, cycle not running.
    Enabled,
    /// The periodic cycle is executing on its dedicated thread.
    Running,
    /// The cycle has been halted; `enable` may be called again to restart.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Enabled => "enabled",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Snafu)]
pub enum ProcessError {
    #[snafu(display("cannot {action} while {state}"))]
    BadLifecycle {
        action: &'static str,
        state: LifecycleState,
    },
    #[snafu(display("configuration rejected: {source}"))]
    Rejected { source: ConfigError },
}

/// The fully constructed component set of one managed unit, built at `enable`
/// and owned by the cycle thread while running.
struct Wired {
    model: Arc<dyn Model>,
    observer: Box<dyn Observer>,
    predictor: Box<dyn Predictor>,
    comm: Arc<dyn Communicator>,
    period: StdDuration,
    predict_interval: u32,
}

/// The orchestrator of one managed unit.
///
/// `enable` resolves and validates every component from the registry, `start`
/// begins the estimate, predict, publish cycle on a dedicated thread, and
/// `stop` halts it. These three calls are the entire external surface; the
/// cycle itself runs implicitly between `start` and `stop`.
///
/// `stop` guarantees that no cycle begins after it returns. An in-flight
/// cycle is drained with a bounded wait; past that wait it is abandoned, in
/// which case the observer keeps its last fully-committed estimate and the
/// publish gate prevents the abandoned cycle from handing out a result.
pub struct Prognoser {
    lifecycle: Arc<Mutex<LifecycleState>>,
    wired: Option<Wired>,
    run: Option<RunHandles>,
    drain_timeout: StdDuration,
}

struct RunHandles {
    cancel: Arc<Cancellation>,
    publish_gate: Arc<Mutex<bool>>,
    drained: Arc<Latch>,
    worker: JoinHandle<()>,
}

impl Prognoser {
    pub fn new() -> Self {
        Self {
            lifecycle: Arc::new(Mutex::new(LifecycleState::Idle)),
            wired: None,
            run: None,
            drain_timeout: StdDuration::from_secs(2),
        }
    }

    /// Sets how long `stop` waits for an in-flight cycle before abandoning
    /// it.
    pub fn with_drain_timeout(mut self, timeout: StdDuration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock().unwrap()
    }

    /// Resolves and constructs the configured model, observer, predictor and
    /// communicator, validating every configuration value eagerly. On any
    /// failure nothing is wired and the lifecycle state is unchanged.
    pub fn enable(&mut self, registry: &Registry, config: ProgConfig) -> Result<(), ProcessError> {
        {
            let state = self.lifecycle.lock().unwrap();
            ensure!(
                matches!(*state, LifecycleState::Idle | LifecycleState::Stopped),
                BadLifecycleSnafu {
                    action: "enable",
                    state: *state,
                }
            );
        }

        let model = registry
            .create_model(&config.model, &config)
            .context(RejectedSnafu)?;
        config.validate(model.as_ref()).context(RejectedSnafu)?;
        let observer = registry
            .create_observer(&config.observer, model.clone(), &config)
            .context(RejectedSnafu)?;
        let predictor = registry
            .create_predictor(&config.predictor, model.clone(), &config)
            .context(RejectedSnafu)?;
        let comm = registry
            .create_communicator(&config.communicator, &config)
            .context(RejectedSnafu)?;

        self.wired = Some(Wired {
            model,
            observer,
            predictor,
            comm,
            period: StdDuration::from_secs_f64(config.period.to_seconds()),
            predict_interval: config.predict_interval,
        });
        *self.lifecycle.lock().unwrap() = LifecycleState::Enabled;
        info!(
            "enabled: model {}, observer {}, predictor {}, communicator {}",
            config.model, config.observer, config.predictor, config.communicator
        );
        Ok(())
    }

    /// Begins the periodic cycle. Only legal from `Enabled`.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        let mut state = self.lifecycle.lock().unwrap();
        ensure!(
            *state == LifecycleState::Enabled,
            BadLifecycleSnafu {
                action: "start",
                state: *state,
            }
        );
        let wired = match self.wired.take() {
            Some(wired) => wired,
            None => {
                return BadLifecycleSnafu {
                    action: "start",
                    state: *state,
                }
                .fail()
            }
        };

        let cancel = Arc::new(Cancellation::default());
        let publish_gate = Arc::new(Mutex::new(true));
        let drained = Arc::new(Latch::default());
        let worker = {
            let cancel = cancel.clone();
            let publish_gate = publish_gate.clone();
            let drained = drained.clone();
            thread::spawn(move || run_cycles(wired, cancel, publish_gate, drained))
        };
        self.run = Some(RunHandles {
            cancel,
            publish_gate,
            drained,
            worker,
        });
        *state = LifecycleState::Running;
        info!("started");
        Ok(())
    }

    /// Halts the periodic cycle. A no-op unless running.
    pub fn stop(&mut self) {
        {
            let state = self.lifecycle.lock().unwrap();
            if *state != LifecycleState::Running {
                debug!("stop is a no-op while {}", *state);
                return;
            }
        }
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
            if run.drained.wait(self.drain_timeout) {
                let _ = run.worker.join();
            } else {
                warn!(
                    "in-flight cycle did not drain within {:?}, abandoning it",
                    self.drain_timeout
                );
            }
            // Closing the gate blocks on any in-flight publish, so once stop
            // has returned no publish can start.
            *run.publish_gate.lock().unwrap() = false;
        }
        *self.lifecycle.lock().unwrap() = LifecycleState::Stopped;
        info!("stopped");
    }
}

impl Default for Prognoser {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Prognoser {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The cycle scheduler: runs on the dedicated thread from `start` until
/// cancellation, one cycle per period, skipping (never queueing) periods the
/// previous cycle overran.
fn run_cycles(
    mut wired: Wired,
    cancel: Arc<Cancellation>,
    publish_gate: Arc<Mutex<bool>>,
    drained: Arc<Latch>,
) {
    info!("cycle thread started, period {:?}", wired.period);
    let mut cycles: u64 = 0;
    let mut deadline = Instant::now();
    loop {
        if cancel.wait_until(deadline) {
            break;
        }
        run_one_cycle(&mut wired, &mut cycles, &publish_gate);
        deadline += wired.period;
        let now = Instant::now();
        if deadline <= now {
            let mut skipped = 0_u32;
            while deadline <= now {
                deadline += wired.period;
                skipped += 1;
            }
            warn!("cycle overran its period, skipping {skipped} invocation(s)");
        }
    }
    info!("cycle thread exiting after {cycles} non-empty cycles");
    drained.open();
}

/// One estimate, predict, publish cycle.
fn run_one_cycle(wired: &mut Wired, cycles: &mut u64, publish_gate: &Mutex<bool>) {
    let sample = match wired.comm.poll() {
        Some(sample) => sample,
        None => {
            trace!("no sample available, empty cycle");
            return;
        }
    };

    if !wired.observer.is_initialized() {
        let x0 = wired.model.initial_state(&sample.inputs, &sample.outputs);
        if let Err(error) = wired.observer.initialize(sample.epoch, &x0, &sample.inputs) {
            warn!("initialization failed, cycle discarded: {error}");
            return;
        }
        info!("observer initialized at {}", sample.epoch);
    } else {
        if let Some(last) = wired.observer.last_time() {
            if sample.epoch <= last {
                debug!(
                    "stale sample at {} (last processed {}), empty cycle",
                    sample.epoch, last
                );
                return;
            }
        }
        if let Err(error) = wired
            .observer
            .step(sample.epoch, &sample.inputs, &sample.outputs)
        {
            warn!("estimation step failed, previous estimate retained: {error}");
            return;
        }
    }
    *cycles += 1;

    let estimate = match wired.observer.state_estimate() {
        Ok(estimate) => estimate,
        Err(error) => {
            warn!("estimate unavailable after step: {error}");
            return;
        }
    };

    let prediction = if *cycles % u64::from(wired.predict_interval) == 0 {
        // The assumed future load is the most recently observed one.
        let profile = ConstantLoad::new(sample.inputs.clone());
        match wired.predictor.predict(sample.epoch, &estimate, &profile) {
            Ok(prediction) => {
                info!("{prediction}");
                Some(prediction)
            }
            Err(error) => {
                warn!("prediction failed, none published this cycle: {error}");
                None
            }
        }
    } else {
        None
    };

    let output = ProgOutput {
        estimate: estimate.to_record(wired.model.state_names()),
        prediction,
    };
    let gate = publish_gate.lock().unwrap();
    if *gate {
        wired.comm.publish(&output);
    } else {
        debug!("publish gate closed, cycle result dropped");
    }
}

/// A cancellable deadline wait shared between the caller side and the cycle
/// thread.
#[derive(Default)]
struct Cancellation {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl Cancellation {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Blocks until the deadline or cancellation, whichever comes first.
    /// Returns true when cancelled.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.cancelled.lock().unwrap();
        loop {
            if *cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
        }
    }
}

/// A one-shot open latch, used by the cycle thread to signal that it has
/// fully drained.
#[derive(Default)]
struct Latch {
    is_open: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn open(&self) {
        *self.is_open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Waits up to `timeout` for the latch. Returns true if it opened.
    fn wait(&self, timeout: StdDuration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut is_open = self.is_open.lock().unwrap();
        loop {
            if *is_open {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(is_open, deadline - now).unwrap();
            is_open = guard;
        }
    }
}

#[test]
fn test_cancellation_wakes_waiter() {
    let cancel = Arc::new(Cancellation::default());
    let waiter = {
        let cancel = cancel.clone();
        thread::spawn(move || cancel.wait_until(Instant::now() + StdDuration::from_secs(30)))
    };
    thread::sleep(StdDuration::from_millis(20));
    cancel.cancel();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_wait_until_expires() {
    let cancel = Cancellation::default();
    let start = Instant::now();
    assert!(!cancel.wait_until(start + StdDuration::from_millis(30)));
    assert!(start.elapsed() >= StdDuration::from_millis(30));
}
