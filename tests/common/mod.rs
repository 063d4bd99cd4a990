#![allow(dead_code)]

extern crate lachesis;
extern crate pretty_env_logger;

use lachesis::comm::{Communicator, LatestValueCell, ProgOutput, Sample};
use lachesis::io::ConfigError;
use lachesis::linalg::DVector;
use lachesis::model::Model;
use lachesis::observers::{ExtendedKalmanFilter, Observer, UnscentedKalmanFilter};
use lachesis::predict::{MonteCarloPredictor, Predictor};
use lachesis::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn init_logger() {
    if pretty_env_logger::try_init().is_err() {
        println!("could not init env_logger");
    }
}

/// A battery-like linear discharge model: one state (charge), drained at a
/// fixed rate per unit load, observed through a voltage proportional to the
/// charge. The monitored event fires when the charge drops below a floor.
pub struct LinearDischargeModel {
    /// Charge drained per second per unit load.
    pub rate: f64,
    /// Output gain: voltage = gain * charge.
    pub gain: f64,
    /// Event floor: "discharged" fires when charge < floor.
    pub floor: f64,
    states: Vec<String>,
    events: Vec<String>,
}

impl Default for LinearDischargeModel {
    fn default() -> Self {
        Self {
            rate: 0.01,
            gain: 2.0,
            floor: 0.1,
            states: vec!["charge".to_string()],
            events: vec!["discharged".to_string()],
        }
    }
}

impl Model for LinearDischargeModel {
    fn state_size(&self) -> usize {
        1
    }

    fn input_size(&self) -> usize {
        1
    }

    fn output_size(&self) -> usize {
        1
    }

    fn state_names(&self) -> &[String] {
        &self.states
    }

    fn event_names(&self) -> &[String] {
        &self.events
    }

    fn state_eqn(
        &self,
        _t_s: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        process_noise: &DVector<f64>,
        dt_s: f64,
    ) -> DVector<f64> {
        DVector::from_vec(vec![x[0] - self.rate * u[0] * dt_s + process_noise[0]])
    }

    fn output_eqn(
        &self,
        _t_s: f64,
        x: &DVector<f64>,
        _u: &DVector<f64>,
        measurement_noise: &DVector<f64>,
    ) -> DVector<f64> {
        DVector::from_vec(vec![self.gain * x[0] + measurement_noise[0]])
    }

    fn threshold_eqn(&self, _t_s: f64, x: &DVector<f64>, _u: &DVector<f64>) -> Vec<bool> {
        vec![x[0] < self.floor]
    }

    fn initial_state(&self, _u: &DVector<f64>, z: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![z[0] / self.gain])
    }
}

/// An n-state variant of the discharge model, for dimension-parameterized
/// properties: every state drains at the same rate, the output is their sum.
pub struct NDimDischargeModel {
    pub n: usize,
    states: Vec<String>,
    events: Vec<String>,
}

impl NDimDischargeModel {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            states: (0..n).map(|i| format!("cell{i}")).collect(),
            events: vec!["discharged".to_string()],
        }
    }
}

impl Model for NDimDischargeModel {
    fn state_size(&self) -> usize {
        self.n
    }

    fn input_size(&self) -> usize {
        1
    }

    fn output_size(&self) -> usize {
        1
    }

    fn state_names(&self) -> &[String] {
        &self.states
    }

    fn event_names(&self) -> &[String] {
        &self.events
    }

    fn state_eqn(
        &self,
        _t_s: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        process_noise: &DVector<f64>,
        dt_s: f64,
    ) -> DVector<f64> {
        DVector::from_fn(self.n, |i, _| x[i] - 0.01 * u[0] * dt_s + process_noise[i])
    }

    fn output_eqn(
        &self,
        _t_s: f64,
        x: &DVector<f64>,
        _u: &DVector<f64>,
        measurement_noise: &DVector<f64>,
    ) -> DVector<f64> {
        DVector::from_vec(vec![x.sum() + measurement_noise[0]])
    }

    fn threshold_eqn(&self, _t_s: f64, x: &DVector<f64>, _u: &DVector<f64>) -> Vec<bool> {
        vec![x.sum() < 0.1]
    }

    fn initial_state(&self, _u: &DVector<f64>, z: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(self.n, z[0] / self.n as f64)
    }
}

/// A communicator replaying a pre-scripted sample sequence, one per poll, and
/// recording everything published.
pub struct ScriptedComm {
    samples: Mutex<VecDeque<Sample>>,
    published: Mutex<Vec<ProgOutput>>,
}

impl ScriptedComm {
    pub fn new(samples: Vec<Sample>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples.into()),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<ProgOutput> {
        self.published.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.samples.lock().unwrap().len()
    }
}

impl Communicator for ScriptedComm {
    fn poll(&self) -> Option<Sample> {
        self.samples.lock().unwrap().pop_front()
    }

    fn publish(&self, output: &ProgOutput) {
        self.published.lock().unwrap().push(output.clone());
    }
}

/// A communicator backed by a latest-value cell, for tests producing samples
/// concurrently with the running cycle.
pub struct CellComm {
    pub inbox: LatestValueCell<Sample>,
    published: Mutex<Vec<ProgOutput>>,
}

impl CellComm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inbox: LatestValueCell::new(),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<ProgOutput> {
        self.published.lock().unwrap().clone()
    }
}

impl Communicator for CellComm {
    fn poll(&self) -> Option<Sample> {
        self.inbox.take()
    }

    fn publish(&self, output: &ProgOutput) {
        self.published.lock().unwrap().push(output.clone());
    }
}

/// Registers the model, both observers and the Monte Carlo predictor under
/// their conventional names. Communicators are registered per test since they
/// carry scripted data.
pub fn register_components(registry: &mut Registry) {
    registry.register_model(
        "linear_battery",
        |_cfg| -> Result<Arc<dyn Model>, ConfigError> {
            Ok(Arc::new(LinearDischargeModel::default()))
        },
    );
    registry.register_observer(
        "ukf",
        |model, cfg| -> Result<Box<dyn Observer>, ConfigError> {
            Ok(Box::new(UnscentedKalmanFilter::from_config(model, cfg)?))
        },
    );
    registry.register_observer(
        "ekf",
        |model, cfg| -> Result<Box<dyn Observer>, ConfigError> {
            Ok(Box::new(ExtendedKalmanFilter::from_config(model, cfg)?))
        },
    );
    registry.register_predictor(
        "mc",
        |model, cfg| -> Result<Box<dyn Predictor>, ConfigError> {
            Ok(Box::new(MonteCarloPredictor::from_config(model, cfg)?))
        },
    );
}

/// A baseline configuration for the linear battery scenario.
pub fn battery_config(communicator: &str) -> ProgConfig {
    ProgConfig::builder()
        .model("linear_battery".to_string())
        .observer("ukf".to_string())
        .predictor("mc".to_string())
        .communicator(communicator.to_string())
        .process_noise(vec![0.01])
        .measurement_noise(vec![0.01])
        .period(10.milliseconds())
        .sample_count(100)
        .horizon(100.seconds())
        .step(1.seconds())
        .seed(42)
        .build()
}

/// The noise-free truth sequence of the linear battery under unit load: one
/// (input, output, epoch) sample per second.
pub fn battery_truth(model: &LinearDischargeModel, start: Epoch, steps: usize) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(steps);
    let mut charge = 1.0;
    for k in 0..steps {
        let epoch = start + (k as i64).seconds();
        if k > 0 {
            charge -= model.rate;
        }
        samples.push(Sample {
            epoch,
            inputs: DVector::from_vec(vec![1.0]),
            outputs: DVector::from_vec(vec![model.gain * charge]),
        });
    }
    samples
}
