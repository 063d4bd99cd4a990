extern crate lachesis;
extern crate pretty_env_logger;

mod common;

use common::{init_logger, LinearDischargeModel};
use lachesis::estimate::StateEstimate;
use lachesis::linalg::{DMatrix, DVector};
use lachesis::model::{model_secs, Model};
use lachesis::predict::{
    ConstantLoad, MonteCarloPredictor, PredictConfig, Predictor,
};
use lachesis::prelude::*;
use lachesis::utils::zero_noise;
use std::sync::Arc;

fn battery() -> Arc<dyn Model> {
    Arc::new(LinearDischargeModel::default())
}

fn predictor(sample_count: usize, seed: u64, q: f64) -> MonteCarloPredictor {
    let config = PredictConfig::builder()
        .sample_count(sample_count)
        .horizon(100.seconds())
        .step(1.seconds())
        .seed(seed)
        .build();
    MonteCarloPredictor::new(battery(), DMatrix::from_element(1, 1, q), config).unwrap()
}

#[test]
fn config_is_validated_eagerly() {
    let bad = PredictConfig::builder()
        .sample_count(0)
        .horizon(100.seconds())
        .step(1.seconds())
        .build();
    assert!(MonteCarloPredictor::new(battery(), DMatrix::zeros(1, 1), bad).is_err());

    let bad = PredictConfig::builder()
        .sample_count(10)
        .horizon(1.seconds())
        .step(2.seconds())
        .build();
    assert!(MonteCarloPredictor::new(battery(), DMatrix::zeros(1, 1), bad).is_err());

    // Q sized to the wrong dimension.
    let good = PredictConfig::builder()
        .sample_count(10)
        .horizon(100.seconds())
        .step(1.seconds())
        .build();
    assert!(MonteCarloPredictor::new(battery(), DMatrix::zeros(2, 2), good).is_err());
}

/// With a single particle, zero initial variance and zero process noise, the
/// predictor must reproduce the trajectory of direct equation iteration, to
/// the bit.
#[test]
fn single_particle_matches_direct_iteration() {
    init_logger();
    let model = LinearDischargeModel::default();
    let epoch = Epoch::from_tai_seconds(0.0);
    let estimate =
        StateEstimate::new(epoch, DVector::from_vec(vec![1.0]), DMatrix::zeros(1, 1)).unwrap();
    let load = DVector::from_vec(vec![1.0]);

    let mc = predictor(1, 7, 0.0);
    let prediction = mc
        .predict(epoch, &estimate, &ConstantLoad::new(load.clone()))
        .unwrap();

    // Direct iteration of the model equations with the same stepping.
    let mut x = DVector::from_vec(vec![1.0]);
    let mut t = epoch;
    let zero = zero_noise(1);
    let expected = loop {
        x = model.state_eqn(model_secs(t), &x, &load, &zero, 1.0);
        t += 1.seconds();
        if model.threshold_eqn(model_secs(t), &x, &load)[0] {
            break Some(t);
        }
        if t >= epoch + 100.seconds() {
            break None;
        }
    };

    assert_eq!(prediction.sample_count, 1);
    assert_eq!(prediction.censored, 0);
    assert_eq!(prediction.outcomes.len(), 1);
    assert_eq!(Some(prediction.outcomes[0].0), expected);
    assert_eq!(prediction.outcomes[0].1, 1.0);
}

#[test]
fn weights_and_censoring_account_for_every_particle() {
    init_logger();
    let epoch = Epoch::from_tai_seconds(0.0);
    // A wide initial distribution so that a fraction of the particles only
    // cross the floor beyond the horizon.
    let estimate = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![1.05]),
        DMatrix::from_element(1, 1, 0.05 * 0.05),
    )
    .unwrap();
    let load = ConstantLoad::new(DVector::from_vec(vec![1.0]));

    let mc = predictor(500, 13, 1e-8);
    let prediction = mc.predict(epoch, &estimate, &load).unwrap();

    assert_eq!(
        prediction.outcomes.len() + prediction.censored,
        prediction.sample_count
    );
    assert!(prediction.censored > 0, "expected some censored particles");
    assert!(prediction.outcomes.iter().all(|(_, w)| *w > 0.0));
    // Outcome mass plus censored mass is exactly one.
    let total = prediction.total_weight() + prediction.censored_fraction();
    assert!((total - 1.0).abs() < 1e-9, "total mass {total}");
}

#[test]
fn identical_seeds_are_bit_identical() {
    init_logger();
    let epoch = Epoch::from_tai_seconds(50.0);
    let estimate = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![0.9]),
        DMatrix::from_element(1, 1, 0.02 * 0.02),
    )
    .unwrap();
    let load = ConstantLoad::new(DVector::from_vec(vec![1.0]));

    let first = predictor(200, 99, 1e-6).predict(epoch, &estimate, &load).unwrap();
    let second = predictor(200, 99, 1e-6).predict(epoch, &estimate, &load).unwrap();
    assert_eq!(first, second);

    // A different seed reshuffles the draws.
    let third = predictor(200, 100, 1e-6).predict(epoch, &estimate, &load).unwrap();
    assert_ne!(first.outcomes, third.outcomes);
}

/// The linear decay crosses the floor after (x0 - floor) / rate seconds; the
/// median predicted event time must land in a band around that.
#[test]
fn median_event_time_matches_analytic_crossing() {
    init_logger();
    let epoch = Epoch::from_tai_seconds(0.0);
    let estimate = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![1.0]),
        DMatrix::from_element(1, 1, 0.02 * 0.02),
    )
    .unwrap();
    let load = ConstantLoad::new(DVector::from_vec(vec![1.0]));

    let mc = predictor(1000, 42, 0.0);
    let prediction = mc.predict(epoch, &estimate, &load).unwrap();
    assert!(prediction.censored == 0, "no particle should be censored");

    // Analytic crossing at (1.0 - 0.1) / 0.01 = 90 s; sigma 0.02 on the
    // initial charge spreads it by about 2 s.
    let median = prediction.median().unwrap();
    let elapsed = (median - epoch).to_seconds();
    assert!(
        (86.0..=96.0).contains(&elapsed),
        "median crossing at {elapsed} s, expected about 91 s"
    );
}

#[test]
fn dimension_mismatches_are_rejected() {
    let epoch = Epoch::from_tai_seconds(0.0);
    let mc = predictor(10, 0, 0.0);

    // Two-state estimate against a one-state model.
    let estimate =
        StateEstimate::new(epoch, DVector::zeros(2), DMatrix::zeros(2, 2)).unwrap();
    let load = ConstantLoad::new(DVector::from_vec(vec![1.0]));
    assert!(mc.predict(epoch, &estimate, &load).is_err());

    // Input profile of the wrong width.
    let estimate =
        StateEstimate::new(epoch, DVector::from_vec(vec![1.0]), DMatrix::zeros(1, 1)).unwrap();
    let wide_load = ConstantLoad::new(DVector::zeros(3));
    assert!(mc.predict(epoch, &estimate, &wide_load).is_err());
}
