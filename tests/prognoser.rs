extern crate lachesis;
extern crate pretty_env_logger;

mod common;

use common::{
    battery_config, battery_truth, init_logger, register_components, CellComm,
    LinearDischargeModel, ScriptedComm,
};
use lachesis::comm::{Communicator, Sample};
use lachesis::estimate::Uncertainty;
use lachesis::io::ConfigError;
use lachesis::linalg::DVector;
use lachesis::prelude::*;
use lachesis::prognoser::ProcessError;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

fn register_scripted(registry: &mut Registry, comm: Arc<ScriptedComm>) {
    registry.register_communicator(
        "scripted",
        move |_cfg| -> Result<Arc<dyn Communicator>, ConfigError> { Ok(comm.clone()) },
    );
}

#[test]
fn start_before_enable_is_a_precondition_violation() {
    init_logger();
    let mut prognoser = Prognoser::new();
    let err = prognoser.start().unwrap_err();
    assert!(matches!(err, ProcessError::BadLifecycle { .. }), "{err}");
    assert_eq!(prognoser.lifecycle(), LifecycleState::Idle);
}

#[test]
fn stop_when_not_running_is_a_noop() {
    let mut prognoser = Prognoser::new();
    prognoser.stop();
    assert_eq!(prognoser.lifecycle(), LifecycleState::Idle);
}

#[test]
fn enable_with_unknown_type_stays_idle() {
    init_logger();
    let registry = Registry::new();
    let mut prognoser = Prognoser::new();
    let err = prognoser
        .enable(&registry, battery_config("scripted"))
        .unwrap_err();
    assert!(
        matches!(
            err,
            ProcessError::Rejected {
                source: ConfigError::UnknownType { kind: "model", .. },
            }
        ),
        "{err}"
    );
    assert_eq!(prognoser.lifecycle(), LifecycleState::Idle);
}

#[test]
fn enable_with_bad_noise_matrix_stays_idle() {
    init_logger();
    let mut registry = Registry::new();
    register_components(&mut registry);
    register_scripted(&mut registry, ScriptedComm::new(Vec::new()));

    // Three values cannot fill a square matrix.
    let mut config = battery_config("scripted");
    config.process_noise = vec![0.01, 0.0, 0.01];

    let mut prognoser = Prognoser::new();
    let err = prognoser.enable(&registry, config).unwrap_err();
    assert!(
        matches!(
            err,
            ProcessError::Rejected {
                source: ConfigError::NotSquare { .. },
            }
        ),
        "{err}"
    );
    assert_eq!(prognoser.lifecycle(), LifecycleState::Idle);
}

#[test]
fn double_start_is_rejected() {
    init_logger();
    let mut registry = Registry::new();
    register_components(&mut registry);
    register_scripted(&mut registry, ScriptedComm::new(Vec::new()));

    let mut prognoser = Prognoser::new();
    prognoser
        .enable(&registry, battery_config("scripted"))
        .unwrap();
    prognoser.start().unwrap();
    assert_eq!(prognoser.lifecycle(), LifecycleState::Running);
    assert!(prognoser.start().is_err());
    prognoser.stop();
    assert_eq!(prognoser.lifecycle(), LifecycleState::Stopped);
}

/// The full pipeline: scripted truth samples in, estimates and a prediction
/// out, then a restart from Stopped.
#[test]
fn end_to_end_scripted_run() {
    init_logger();
    let model = LinearDischargeModel::default();
    let start_epoch = Epoch::from_tai_seconds(0.0);
    let comm = ScriptedComm::new(battery_truth(&model, start_epoch, 5));

    let mut registry = Registry::new();
    register_components(&mut registry);
    register_scripted(&mut registry, comm.clone());

    // Predict on the fifth non-empty cycle only. The predictor simulates
    // with a near-deterministic process noise so the crossing band stays
    // tight despite the filter's Q.
    let mut config = battery_config("scripted");
    config.predict_interval = 5;
    config.sample_count = 1000;
    config.period = 5.milliseconds();
    config.predictor_process_noise = vec![1e-8];

    let mut prognoser = Prognoser::new();
    prognoser.enable(&registry, config).unwrap();
    prognoser.start().unwrap();

    // Give the cycle thread ample time to drain all five samples.
    let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
    while comm.remaining() > 0 && std::time::Instant::now() < deadline {
        thread::sleep(StdDuration::from_millis(10));
    }
    thread::sleep(StdDuration::from_millis(50));
    prognoser.stop();
    assert_eq!(prognoser.lifecycle(), LifecycleState::Stopped);

    let published = comm.published();
    assert_eq!(published.len(), 5, "one publication per sample");

    // No publication may appear after stop has returned.
    thread::sleep(StdDuration::from_millis(50));
    assert_eq!(comm.published().len(), published.len());

    // The estimate tracks the truth: by the third cycle the charge estimate
    // is within 5% of the true value.
    let true_charge_step3 = 1.0 - 2.0 * model.rate;
    let (name, Uncertainty::MeanCovar { mean, covar }) = &published[2].estimate.entries[0];
    assert_eq!(name, "charge");
    assert!(
        (mean - true_charge_step3).abs() / true_charge_step3 < 0.05,
        "estimated charge {mean} vs truth {true_charge_step3}"
    );
    assert_eq!(covar.len(), 1);

    // Only the fifth cycle carries a prediction, with a median event time in
    // the analytic band of the linear decay.
    for output in &published[..4] {
        assert!(output.prediction.is_none());
    }
    let prediction = published[4].prediction.as_ref().expect("fifth cycle predicts");
    assert_eq!(
        prediction.outcomes.len() + prediction.censored,
        prediction.sample_count
    );
    let elapsed = (prediction.median().unwrap() - prediction.epoch).to_seconds();
    // About (0.96 - 0.1) / 0.01 = 86 s left at the fifth sample.
    assert!(
        (80.0..=92.0).contains(&elapsed),
        "median crossing in {elapsed} s, expected about 86 s"
    );

    // Stopped -> Enabled is re-entrant: a fresh scripted run restarts.
    let comm2 = ScriptedComm::new(battery_truth(&model, start_epoch + 100.seconds(), 2));
    let mut registry2 = Registry::new();
    register_components(&mut registry2);
    register_scripted(&mut registry2, comm2.clone());
    prognoser
        .enable(&registry2, battery_config("scripted"))
        .unwrap();
    assert_eq!(prognoser.lifecycle(), LifecycleState::Enabled);
    prognoser.start().unwrap();
    let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
    while comm2.remaining() > 0 && std::time::Instant::now() < deadline {
        thread::sleep(StdDuration::from_millis(10));
    }
    thread::sleep(StdDuration::from_millis(50));
    prognoser.stop();
    assert!(!comm2.published().is_empty());
}

/// Samples produced concurrently through a latest-value cell: stale epochs
/// are dropped, the estimate keeps moving forward.
#[test]
fn live_cell_run_drops_stale_samples() {
    init_logger();
    let model = LinearDischargeModel::default();
    let comm = CellComm::new();

    let mut registry = Registry::new();
    register_components(&mut registry);
    let comm_for_ctor = comm.clone();
    registry.register_communicator(
        "cell",
        move |_cfg| -> Result<Arc<dyn Communicator>, ConfigError> { Ok(comm_for_ctor.clone()) },
    );

    let mut config = battery_config("cell");
    config.period = 5.milliseconds();
    config.predict_interval = 1000; // estimation only

    let mut prognoser = Prognoser::new();
    prognoser.enable(&registry, config).unwrap();
    prognoser.start().unwrap();

    let start_epoch = Epoch::from_tai_seconds(0.0);
    for sample in battery_truth(&model, start_epoch, 4) {
        comm.inbox.offer(sample);
        thread::sleep(StdDuration::from_millis(30));
    }
    // A stale sample (epoch already processed) must yield no publication.
    let published_before = comm.published().len();
    comm.inbox.offer(Sample {
        epoch: start_epoch,
        inputs: DVector::from_vec(vec![1.0]),
        outputs: DVector::from_vec(vec![2.0]),
    });
    thread::sleep(StdDuration::from_millis(60));
    prognoser.stop();

    let published = comm.published();
    assert!(
        published.len() >= 2,
        "expected live estimates, got {}",
        published.len()
    );
    assert_eq!(
        published.len(),
        published_before,
        "stale sample must not produce a publication"
    );
    // Epochs strictly increase across publications.
    for pair in published.windows(2) {
        assert!(pair[1].estimate.epoch > pair[0].estimate.epoch);
    }
}
