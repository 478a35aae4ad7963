//! Thin wrappers over the smartcore estimators.
//!
//! Fitting itself is entirely smartcore's; this module only picks the
//! estimator and hyperparameters for an [`Algorithm`] and keeps the fitted
//! model in a serde-friendly enum so it can be persisted in an artifact.

use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use std::fmt;

use super::{Algorithm, SEED};
use crate::error::{Error, Result};

pub type Matrix = DenseMatrix<f64>;

type LinearModel = LinearRegression<f64, f64, Matrix, Vec<f64>>;
type TreeRegressorModel = DecisionTreeRegressor<f64, f64, Matrix, Vec<f64>>;
type ForestRegressorModel = RandomForestRegressor<f64, f64, Matrix, Vec<f64>>;
type LogisticModel = LogisticRegression<f64, i32, Matrix, Vec<i32>>;
type TreeClassifierModel = DecisionTreeClassifier<f64, i32, Matrix, Vec<i32>>;
type ForestClassifierModel = RandomForestClassifier<f64, i32, Matrix, Vec<i32>>;

/// Capability every fitted estimator offers to the trainers.
pub trait TrainableModel: Sized {
    type Target: Copy;

    fn fit(config: &EstimatorConfig, x: &Matrix, y: &[Self::Target]) -> Result<Self>;

    fn predict(&self, x: &Matrix) -> Result<Vec<Self::Target>>;

    /// Positive-class probability per row, when the estimator exposes one.
    fn predict_probability(&self, _x: &Matrix) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }
}

/// Algorithm plus the tree hyperparameters it is fitted with. Linear models
/// ignore the tree settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub algorithm: Algorithm,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub n_trees: u16,
}

impl EstimatorConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            max_depth: None,
            min_samples_split: 2,
            n_trees: 100,
        }
    }

    pub fn max_depth(mut self, depth: u16) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regressor {
    Linear(LinearModel),
    DecisionTree(TreeRegressorModel),
    RandomForest(ForestRegressorModel),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classifier {
    Logistic(LogisticModel),
    DecisionTree(TreeClassifierModel),
    RandomForest(ForestClassifierModel),
}

impl fmt::Debug for Regressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Regressor::Linear(_) => "Linear",
            Regressor::DecisionTree(_) => "DecisionTree",
            Regressor::RandomForest(_) => "RandomForest",
        };
        write!(f, "Regressor::{name}")
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classifier::Logistic(_) => "Logistic",
            Classifier::DecisionTree(_) => "DecisionTree",
            Classifier::RandomForest(_) => "RandomForest",
        };
        write!(f, "Classifier::{name}")
    }
}

impl TrainableModel for Regressor {
    type Target = f64;

    fn fit(config: &EstimatorConfig, x: &Matrix, y: &[f64]) -> Result<Self> {
        let y = y.to_vec();
        let model = match config.algorithm {
            Algorithm::LinearRegression => Regressor::Linear(
                LinearRegression::fit(x, &y, LinearRegressionParameters::default())
                    .map_err(Error::model)?,
            ),
            Algorithm::DecisionTree => {
                let mut params = DecisionTreeRegressorParameters::default()
                    .with_min_samples_split(config.min_samples_split);
                if let Some(depth) = config.max_depth {
                    params = params.with_max_depth(depth);
                }
                Regressor::DecisionTree(
                    DecisionTreeRegressor::fit(x, &y, params).map_err(Error::model)?,
                )
            }
            Algorithm::RandomForest => {
                let mut params = RandomForestRegressorParameters::default()
                    .with_n_trees(config.n_trees as usize)
                    .with_min_samples_split(config.min_samples_split)
                    .with_seed(SEED);
                if let Some(depth) = config.max_depth {
                    params = params.with_max_depth(depth);
                }
                Regressor::RandomForest(
                    RandomForestRegressor::fit(x, &y, params).map_err(Error::model)?,
                )
            }
            Algorithm::LogisticRegression => {
                return Err(Error::invalid("logistic_regression is not a regressor"));
            }
        };
        Ok(model)
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>> {
        let out = match self {
            Regressor::Linear(m) => m.predict(x),
            Regressor::DecisionTree(m) => m.predict(x),
            Regressor::RandomForest(m) => m.predict(x),
        };
        out.map_err(Error::model)
    }
}

impl TrainableModel for Classifier {
    type Target = i32;

    fn fit(config: &EstimatorConfig, x: &Matrix, y: &[i32]) -> Result<Self> {
        let y = y.to_vec();
        let model = match config.algorithm {
            Algorithm::LogisticRegression => Classifier::Logistic(
                LogisticRegression::fit(x, &y, LogisticRegressionParameters::default())
                    .map_err(Error::model)?,
            ),
            Algorithm::DecisionTree => {
                let mut params = DecisionTreeClassifierParameters::default()
                    .with_min_samples_split(config.min_samples_split);
                if let Some(depth) = config.max_depth {
                    params = params.with_max_depth(depth);
                }
                Classifier::DecisionTree(
                    DecisionTreeClassifier::fit(x, &y, params).map_err(Error::model)?,
                )
            }
            Algorithm::RandomForest => {
                let mut params = RandomForestClassifierParameters::default()
                    .with_n_trees(config.n_trees)
                    .with_min_samples_split(config.min_samples_split)
                    .with_seed(SEED);
                if let Some(depth) = config.max_depth {
                    params = params.with_max_depth(depth);
                }
                Classifier::RandomForest(
                    RandomForestClassifier::fit(x, &y, params).map_err(Error::model)?,
                )
            }
            Algorithm::LinearRegression => {
                return Err(Error::invalid("linear_regression is not a classifier"));
            }
        };
        Ok(model)
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<i32>> {
        let out = match self {
            Classifier::Logistic(m) => m.predict(x),
            Classifier::DecisionTree(m) => m.predict(x),
            Classifier::RandomForest(m) => m.predict(x),
        };
        out.map_err(Error::model)
    }

    /// Only logistic regression yields a probability: the sigmoid of its
    /// linear decision function.
    fn predict_probability(&self, x: &Matrix) -> Result<Option<Vec<f64>>> {
        let Classifier::Logistic(m) = self else {
            return Ok(None);
        };
        let coefficients = m.coefficients();
        let intercept = *m.intercept().get((0, 0));
        let (rows, cols) = x.shape();
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            let mut z = intercept;
            for j in 0..cols {
                z += *coefficients.get((0, j)) * *x.get((i, j));
            }
            out.push(1.0 / (1.0 + (-z).exp()));
        }
        Ok(Some(out))
    }
}

/// Packs row vectors into a row-major matrix.
pub fn to_matrix(rows: &[Vec<f64>]) -> Result<Matrix> {
    let ncols = rows
        .first()
        .map(Vec::len)
        .ok_or_else(|| Error::invalid("cannot build a feature matrix from zero rows"))?;
    let mut flat = Vec::with_capacity(rows.len() * ncols);
    for row in rows {
        if row.len() != ncols {
            return Err(Error::model(format!(
                "ragged feature rows: expected {ncols} columns, got {}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(rows.len(), ncols, flat, false))
}
