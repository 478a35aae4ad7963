//! Dataset preparation shared by the trainers: cleaning, seeded splits and
//! k-fold cross-validation.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::SEED;
use super::estimator::{EstimatorConfig, Regressor, TrainableModel, to_matrix};
use super::metrics::{self, CrossValidation};
use crate::error::{Error, Result};
use crate::record::BikeRecord;

pub const TEST_FRACTION: f64 = 0.2;
pub const CV_FOLDS: usize = 10;

/// Drops rows with non-finite weather readings and enforces the row minimum.
pub fn clean(records: &[BikeRecord], min_rows: usize) -> Result<Vec<&BikeRecord>> {
    let kept: Vec<&BikeRecord> = records.iter().filter(|r| r.is_complete()).collect();
    let dropped = records.len() - kept.len();
    if dropped > 0 {
        warn!(dropped, "Dropped rows with missing values");
    }
    if kept.len() < min_rows {
        return Err(Error::InsufficientData {
            found: kept.len(),
            required: min_rows,
        });
    }
    Ok(kept)
}

pub fn feature_rows(records: &[&BikeRecord], names: &[&str]) -> Vec<Vec<f64>> {
    records
        .iter()
        .map(|r| names.iter().map(|n| r.feature(n).unwrap_or(0.0)).collect())
        .collect()
}

pub fn select<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

fn test_len(n: usize) -> usize {
    ((n as f64) * TEST_FRACTION).ceil() as usize
}

/// Shuffled 80/20 split of `0..n` as `(train, test)` index lists.
pub fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(SEED));
    let test = idx.split_off(n - test_len(n).min(n));
    (idx, test)
}

/// 80/20 split that keeps each label's share in both halves.
pub fn stratified_split(labels: &[i32]) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut classes: Vec<i32> = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();

    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in classes {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(&mut rng);
        let mut n_test = ((members.len() as f64) * TEST_FRACTION).round() as usize;
        // Keep at least one example of every class on the training side.
        if n_test >= members.len() {
            n_test = members.len().saturating_sub(1);
        }
        test.extend(members.split_off(members.len() - n_test));
        train.extend(members);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    (train, test)
}

/// Repeats minority-class training indices (cycling in order) until every
/// class has as many rows as the largest one. smartcore forests have no class
/// weights, so this stands in for balanced weighting.
pub fn oversample_minority(train: &[usize], labels: &[i32]) -> Vec<usize> {
    let mut by_class: Vec<(i32, Vec<usize>)> = Vec::new();
    for &i in train {
        match by_class.iter_mut().find(|(c, _)| *c == labels[i]) {
            Some((_, members)) => members.push(i),
            None => by_class.push((labels[i], vec![i])),
        }
    }
    let target = by_class.iter().map(|(_, m)| m.len()).max().unwrap_or(0);

    let mut out = train.to_vec();
    for (class, members) in &by_class {
        let extra = target - members.len();
        if extra > 0 {
            debug!(class, extra, "Oversampling minority class");
        }
        out.extend(members.iter().cycle().take(extra));
    }
    out
}

/// Shuffled k-fold partition of `0..n` as `(train, validation)` pairs.
pub fn kfold(n: usize, k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(SEED));
    let k = k.clamp(1, n.max(1));
    let (base, extra) = (n / k, n % k);

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let len = base + usize::from(fold < extra);
        let validation = idx[start..start + len].to_vec();
        let train = idx[..start]
            .iter()
            .chain(&idx[start + len..])
            .copied()
            .collect();
        folds.push((train, validation));
        start += len;
    }
    folds
}

/// k-fold RMSE/MAE/R² for a regressor over the full cleaned dataset.
/// A failing fold aborts the run; callers log and omit the result.
pub fn cross_validate(
    config: &EstimatorConfig,
    rows: &[Vec<f64>],
    targets: &[f64],
) -> Result<CrossValidation> {
    let mut scores = Vec::with_capacity(CV_FOLDS);
    for (fold, (train_idx, val_idx)) in kfold(rows.len(), CV_FOLDS).into_iter().enumerate() {
        let x_train = to_matrix(&select(rows, &train_idx))?;
        let y_train = select(targets, &train_idx);
        let x_val = to_matrix(&select(rows, &val_idx))?;
        let y_val = select(targets, &val_idx);

        let model = Regressor::fit(config, &x_train, &y_train)?;
        let pred = model.predict(&x_val)?;
        let score = (
            metrics::rmse(&y_val, &pred),
            metrics::mae(&y_val, &pred),
            metrics::r2(&y_val, &pred),
        );
        debug!(fold, rmse = score.0, "Cross-validation fold");
        scores.push(score);
    }
    Ok(metrics::cross_validation(&scores))
}
