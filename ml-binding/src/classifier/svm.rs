//! SVM (Support Vector Machine) inference implementation
//!
//! Inference-only implementation. Training is done in Python. Two export
//! layouts are understood.
//!
//! ## One-vs-rest (`linear_classifiers` / `rbf_classifiers`)
//! One decision function per class:
//!
//! - Linear kernel: f(x) = w·x - rho
//! - RBF kernel: f(x) = Σ(αᵢ·exp(-γ||x-xᵢ||²)) - rho
//!
//! The label is the class with the largest f. When every decision function
//! carries Platt parameters `(a, b)`, the class probability is
//! `1 / (1 + exp(a·f + b))`, normalised across classes.
//!
//! ## One-vs-one (`one_vs_one`)
//! The libsvm model behind scikit-learn's `SVC`: `support_vectors`,
//! `n_support`, `dual_coef` (`svc._dual_coef_`), `intercept`
//! (`svc._intercept_`, i.e. `-rho`) and optionally `probA` / `probB`.
//! Each of the n(n-1)/2 class pairs `(i, j)`, `i < j`, gets
//!
//! f_ij(x) = Σ_{s ∈ SV_i} coef[j-1][s]·K(x, s) + Σ_{s ∈ SV_j} coef[i][s]·K(x, s) + intercept_ij
//!
//! and votes for `i` when `f_ij > 0`, else for `j`. The label is the class
//! with the most votes, lowest index on ties. With `probA` / `probB` the
//! pairwise estimates `r_ij = 1 / (1 + exp(A·f_ij + B))` are coupled into one
//! distribution (Wu, Lin and Weng, method 2), the same as `predict_proba`.
//!
//! Without calibration data the model has no probability support.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{argmax, Classifier, ClassifierKind};
use crate::core::unified_error::{errors, ArtifactError, InferenceError};

/// Kernel type for SVM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelType {
    Linear,
    #[default]
    Rbf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattData {
    pub a: f64,
    pub b: f64,
}

impl PlattData {
    /// `1 / (1 + exp(a·f + b))` without overflowing for large `|a·f + b|`
    fn probability(&self, f: f64) -> f64 {
        let z = self.a * f + self.b;
        if z >= 0.0 {
            (-z).exp() / (1.0 + (-z).exp())
        } else {
            1.0 / (1.0 + z.exp())
        }
    }
}

/// RBF kernel: k(x, y) = exp(-γ||x-y||²)
#[inline]
fn rbf_kernel(gamma: f64, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let sq_dist: f64 = x.iter().zip(y.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
    (-gamma * sq_dist).exp()
}

/// Linear SVM classifier - stores weight vector for fast inference
#[derive(Debug, Clone)]
struct LinearClassifier {
    weights: Array1<f64>,
    rho: f64,
}

impl LinearClassifier {
    /// Decision function: f(x) = w·x - rho
    #[inline]
    fn decision_function(&self, x: &Array1<f64>) -> f64 {
        self.weights.dot(x) - self.rho
    }
}

/// RBF SVM classifier - stores alpha and support vectors for kernel computation
#[derive(Debug, Clone)]
struct RbfClassifier {
    alpha: Vec<f64>,
    support_vectors: Array2<f64>,
    rho: f64,
    gamma: f64,
}

impl RbfClassifier {
    /// Decision function: f(x) = Σ(αᵢ·k(x, xᵢ)) - rho
    fn decision_function(&self, x: &Array1<f64>) -> f64 {
        let sum: f64 = self
            .alpha
            .iter()
            .zip(self.support_vectors.rows())
            .map(|(alpha_i, x_i)| alpha_i * rbf_kernel(self.gamma, x.view(), x_i))
            .sum();
        sum - self.rho
    }
}

/// One decision function, either Linear or RBF
#[derive(Debug, Clone)]
enum DecisionFunction {
    Linear(LinearClassifier),
    Rbf(RbfClassifier),
}

impl DecisionFunction {
    fn evaluate(&self, x: &Array1<f64>) -> f64 {
        match self {
            DecisionFunction::Linear(c) => c.decision_function(x),
            DecisionFunction::Rbf(c) => c.decision_function(x),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinearClassifierData {
    pub class: usize,
    pub weights: Vec<f64>,
    pub rho: f64,
    #[serde(default)]
    pub platt: Option<PlattData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RbfClassifierData {
    pub class: usize,
    pub alpha: Vec<f64>,
    pub support_vectors: Vec<Vec<f64>>,
    pub rho: f64,
    pub gamma: f64,
    #[serde(default)]
    pub platt: Option<PlattData>,
}

/// libsvm one-vs-one model as scikit-learn's `SVC` stores it
#[derive(Debug, Serialize, Deserialize)]
pub struct OneVsOneData {
    /// Required for the RBF kernel
    #[serde(default)]
    pub gamma: Option<f64>,
    /// Grouped by class, `n_support[c]` rows for class `c`
    pub support_vectors: Vec<Vec<f64>>,
    pub n_support: Vec<usize>,
    /// `(num_classes - 1) x num_support_vectors`
    pub dual_coef: Vec<Vec<f64>>,
    /// One per class pair in `(0,1), (0,2), .., (n-2,n-1)` order
    pub intercept: Vec<f64>,
    #[serde(default, rename = "probA", alias = "prob_a")]
    pub prob_a: Vec<f64>,
    #[serde(default, rename = "probB", alias = "prob_b")]
    pub prob_b: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SvmModelData {
    pub num_features: usize,
    pub num_classes: usize,
    pub kernel_type: KernelType,
    #[serde(default)]
    pub linear_classifiers: Vec<LinearClassifierData>,
    #[serde(default)]
    pub rbf_classifiers: Vec<RbfClassifierData>,
    #[serde(default)]
    pub one_vs_one: Option<OneVsOneData>,
}

/// Pairwise libsvm model
#[derive(Debug)]
struct OneVsOne {
    kernel_type: KernelType,
    gamma: f64,
    support_vectors: Array2<f64>,
    /// First support-vector row of each class
    starts: Vec<usize>,
    n_support: Vec<usize>,
    dual_coef: Array2<f64>,
    intercept: Vec<f64>,
    sigmoids: Option<Vec<PlattData>>,
}

impl OneVsOne {
    fn from_data(
        data: OneVsOneData,
        kernel_type: KernelType,
        num_features: usize,
        num_classes: usize,
    ) -> Result<Self, ArtifactError> {
        if num_classes < 2 {
            return Err(errors::invalid_artifact("one-vs-one SVM needs at least two classes"));
        }
        let pairs = num_classes * (num_classes - 1) / 2;
        if data.n_support.len() != num_classes {
            return Err(errors::invalid_artifact(format!(
                "n_support has {} entries, expected {}",
                data.n_support.len(),
                num_classes
            )));
        }
        let total: usize = data.n_support.iter().sum();
        if total != data.support_vectors.len() {
            return Err(errors::invalid_artifact(format!(
                "n_support adds up to {} but there are {} support vectors",
                total,
                data.support_vectors.len()
            )));
        }
        if data.support_vectors.iter().any(|sv| sv.len() != num_features) {
            return Err(errors::invalid_artifact("support vectors have the wrong dimension"));
        }
        if data.dual_coef.len() != num_classes - 1
            || data.dual_coef.iter().any(|row| row.len() != total)
        {
            return Err(errors::invalid_artifact(format!(
                "dual_coef must be {} x {}",
                num_classes - 1,
                total
            )));
        }
        if data.intercept.len() != pairs {
            return Err(errors::invalid_artifact(format!(
                "{} intercepts for {} class pairs",
                data.intercept.len(),
                pairs
            )));
        }
        let gamma = match (kernel_type, data.gamma) {
            (KernelType::Linear, _) => 0.0,
            (KernelType::Rbf, Some(g)) if g.is_finite() && g > 0.0 => g,
            (KernelType::Rbf, _) => {
                return Err(errors::invalid_artifact("RBF kernel needs a positive gamma"));
            }
        };
        let sigmoids = match (data.prob_a.len(), data.prob_b.len()) {
            (0, 0) => None,
            (na, nb) if na == pairs && nb == pairs => Some(
                data.prob_a
                    .iter()
                    .zip(&data.prob_b)
                    .map(|(&a, &b)| PlattData { a, b })
                    .collect(),
            ),
            (na, nb) => {
                return Err(errors::invalid_artifact(format!(
                    "probA/probB have {}/{} entries, expected {}",
                    na, nb, pairs
                )));
            }
        };

        let starts = data
            .n_support
            .iter()
            .scan(0, |next, n| {
                let start = *next;
                *next += n;
                Some(start)
            })
            .collect();
        let support_vectors = Array2::from_shape_vec(
            (total, num_features),
            data.support_vectors.into_iter().flatten().collect(),
        )
        .map_err(|e| errors::invalid_artifact(format!("Failed to restore support vectors: {}", e)))?;
        let dual_coef = Array2::from_shape_vec(
            (num_classes - 1, total),
            data.dual_coef.into_iter().flatten().collect(),
        )
        .map_err(|e| errors::invalid_artifact(format!("Failed to restore dual_coef: {}", e)))?;

        Ok(Self {
            kernel_type,
            gamma,
            support_vectors,
            starts,
            n_support: data.n_support,
            dual_coef,
            intercept: data.intercept,
            sigmoids,
        })
    }

    fn num_classes(&self) -> usize {
        self.n_support.len()
    }

    /// Pairwise decision values in `(0,1), (0,2), .., (n-2,n-1)` order
    fn decision_values(&self, x: &[f64]) -> Vec<f64> {
        let x = ArrayView1::from(x);
        let kvalue: Vec<f64> = self
            .support_vectors
            .rows()
            .into_iter()
            .map(|sv| match self.kernel_type {
                KernelType::Linear => sv.dot(&x),
                KernelType::Rbf => rbf_kernel(self.gamma, x, sv),
            })
            .collect();

        let n = self.num_classes();
        let mut dec = Vec::with_capacity(self.intercept.len());
        for i in 0..n {
            for j in i + 1..n {
                let (si, sj) = (self.starts[i], self.starts[j]);
                let mut sum = self.intercept[dec.len()];
                for s in si..si + self.n_support[i] {
                    sum += self.dual_coef[[j - 1, s]] * kvalue[s];
                }
                for s in sj..sj + self.n_support[j] {
                    sum += self.dual_coef[[i, s]] * kvalue[s];
                }
                dec.push(sum);
            }
        }
        dec
    }

    fn votes(&self, dec: &[f64]) -> Vec<f64> {
        let n = self.num_classes();
        let mut votes = vec![0.0; n];
        let mut p = 0;
        for i in 0..n {
            for j in i + 1..n {
                if dec[p] > 0.0 {
                    votes[i] += 1.0;
                } else {
                    votes[j] += 1.0;
                }
                p += 1;
            }
        }
        votes
    }

    fn probabilities(&self, dec: &[f64]) -> Option<Vec<f64>> {
        const MIN_PROB: f64 = 1e-7;
        let sigmoids = self.sigmoids.as_ref()?;
        let n = self.num_classes();
        let mut r = Array2::<f64>::zeros((n, n));
        let mut p = 0;
        for i in 0..n {
            for j in i + 1..n {
                let r_ij = sigmoids[p].probability(dec[p]).clamp(MIN_PROB, 1.0 - MIN_PROB);
                r[[i, j]] = r_ij;
                r[[j, i]] = 1.0 - r_ij;
                p += 1;
            }
        }
        if n == 2 {
            return Some(vec![r[[0, 1]], r[[1, 0]]]);
        }
        Some(pairwise_coupling(&r))
    }
}

/// Couple pairwise estimates `r[i][j] ≈ P(i | i or j)` into one class
/// distribution (Wu, Lin and Weng 2004, method 2, as in libsvm)
fn pairwise_coupling(r: &Array2<f64>) -> Vec<f64> {
    let k = r.nrows();
    let max_iter = k.max(100);
    let eps = 0.005 / k as f64;

    let mut q = Array2::<f64>::zeros((k, k));
    for t in 0..k {
        for j in 0..k {
            if j == t {
                continue;
            }
            q[[t, t]] += r[[j, t]] * r[[j, t]];
            q[[t, j]] = -r[[j, t]] * r[[t, j]];
        }
    }

    let mut p = vec![1.0 / k as f64; k];
    let mut qp = vec![0.0; k];
    for _ in 0..max_iter {
        let mut pqp = 0.0;
        for t in 0..k {
            qp[t] = (0..k).map(|j| q[[t, j]] * p[j]).sum();
            pqp += p[t] * qp[t];
        }
        let max_error = qp.iter().map(|v| (v - pqp).abs()).fold(0.0, f64::max);
        if max_error < eps {
            break;
        }
        for t in 0..k {
            let diff = (-qp[t] + pqp) / q[[t, t]];
            p[t] += diff;
            pqp = (pqp + diff * (diff * q[[t, t]] + 2.0 * qp[t])) / (1.0 + diff) / (1.0 + diff);
            for j in 0..k {
                qp[j] = (qp[j] + diff * q[[t, j]]) / (1.0 + diff);
                p[j] /= 1.0 + diff;
            }
        }
    }
    p
}

#[derive(Debug)]
enum Scheme {
    OneVsRest {
        functions: Vec<DecisionFunction>,
        platt: Option<Vec<PlattData>>,
    },
    OneVsOne(OneVsOne),
}

/// Multi-class SVM over one-vs-rest or one-vs-one decision functions
#[derive(Debug)]
pub struct SvmClassifier {
    num_features: usize,
    num_classes: usize,
    kernel_type: KernelType,
    scheme: Scheme,
}

impl SvmClassifier {
    /// Load model from JSON
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let data: SvmModelData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn from_data(data: SvmModelData) -> Result<Self, ArtifactError> {
        let num_features = data.num_features;
        if let Some(ovo) = data.one_vs_one {
            if !data.linear_classifiers.is_empty() || !data.rbf_classifiers.is_empty() {
                return Err(errors::invalid_artifact(
                    "one-vs-one SVM cannot also list one-vs-rest classifiers",
                ));
            }
            let model = OneVsOne::from_data(ovo, data.kernel_type, num_features, data.num_classes)?;
            return Ok(Self {
                num_features,
                num_classes: data.num_classes,
                kernel_type: data.kernel_type,
                scheme: Scheme::OneVsOne(model),
            });
        }

        let mut slots: Vec<Option<(DecisionFunction, Option<PlattData>)>> =
            (0..data.num_classes).map(|_| None).collect();

        let mut place = |class: usize,
                         f: DecisionFunction,
                         platt: Option<PlattData>|
         -> Result<(), ArtifactError> {
            let Some(slot) = slots.get_mut(class) else {
                return Err(errors::invalid_artifact(format!(
                    "decision function for class {} out of range",
                    class
                )));
            };
            if slot.is_some() {
                return Err(errors::invalid_artifact(format!(
                    "class {} has more than one decision function",
                    class
                )));
            }
            *slot = Some((f, platt));
            Ok(())
        };

        match data.kernel_type {
            KernelType::Linear => {
                if !data.rbf_classifiers.is_empty() {
                    return Err(errors::invalid_artifact("linear SVM with RBF classifiers"));
                }
                for c in data.linear_classifiers {
                    if c.weights.len() != num_features {
                        return Err(errors::invalid_artifact(format!(
                            "class {} has {} weights, expected {}",
                            c.class,
                            c.weights.len(),
                            num_features
                        )));
                    }
                    let f = DecisionFunction::Linear(LinearClassifier {
                        weights: Array1::from_vec(c.weights),
                        rho: c.rho,
                    });
                    place(c.class, f, c.platt)?;
                }
            }
            KernelType::Rbf => {
                if !data.linear_classifiers.is_empty() {
                    return Err(errors::invalid_artifact("RBF SVM with linear classifiers"));
                }
                for c in data.rbf_classifiers {
                    let n = c.support_vectors.len();
                    if n != c.alpha.len() {
                        return Err(errors::invalid_artifact(format!(
                            "class {} has {} support vectors but {} alphas",
                            c.class,
                            n,
                            c.alpha.len()
                        )));
                    }
                    if c.support_vectors.iter().any(|sv| sv.len() != num_features) {
                        return Err(errors::invalid_artifact(format!(
                            "class {} has support vectors of the wrong dimension",
                            c.class
                        )));
                    }
                    let flat: Vec<f64> = c.support_vectors.into_iter().flatten().collect();
                    let support_vectors = Array2::from_shape_vec((n, num_features), flat)
                        .map_err(|e| {
                            errors::invalid_artifact(format!("Failed to restore support vectors: {}", e))
                        })?;
                    let f = DecisionFunction::Rbf(RbfClassifier {
                        alpha: c.alpha,
                        support_vectors,
                        rho: c.rho,
                        gamma: c.gamma,
                    });
                    place(c.class, f, c.platt)?;
                }
            }
        }

        let mut functions = Vec::with_capacity(slots.len());
        let mut platt = Vec::with_capacity(slots.len());
        for (class, slot) in slots.into_iter().enumerate() {
            let (f, p) = slot.ok_or_else(|| {
                errors::invalid_artifact(format!("no decision function for class {}", class))
            })?;
            functions.push(f);
            platt.push(p);
        }
        if functions.is_empty() {
            return Err(errors::invalid_artifact("model has no classes"));
        }

        // Probability support needs calibration for every class
        let platt = platt.into_iter().collect::<Option<Vec<_>>>();

        Ok(Self {
            num_features,
            num_classes: functions.len(),
            kernel_type: data.kernel_type,
            scheme: Scheme::OneVsRest { functions, platt },
        })
    }

    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type
    }

    pub fn is_one_vs_one(&self) -> bool {
        matches!(self.scheme, Scheme::OneVsOne(_))
    }

    pub fn has_probability(&self) -> bool {
        match &self.scheme {
            Scheme::OneVsRest { platt, .. } => platt.is_some(),
            Scheme::OneVsOne(m) => m.sigmoids.is_some(),
        }
    }

    /// Per-class values for one-vs-rest, per-pair values for one-vs-one
    pub fn decision_values(&self, x: &[f64]) -> Vec<f64> {
        match &self.scheme {
            Scheme::OneVsRest { functions, .. } => {
                let query_arr = Array1::from_vec(x.to_vec());
                functions.iter().map(|f| f.evaluate(&query_arr)).collect()
            }
            Scheme::OneVsOne(m) => m.decision_values(x),
        }
    }

    fn index_from(&self, dec: &[f64]) -> Result<usize, InferenceError> {
        match &self.scheme {
            Scheme::OneVsRest { .. } => argmax(dec),
            Scheme::OneVsOne(m) => {
                if dec.iter().any(|v| !v.is_finite()) {
                    return Err(InferenceError::NonFinite {
                        what: "decision value",
                    });
                }
                argmax(&m.votes(dec))
            }
        }
    }

    fn proba_from(&self, dec: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
        let proba = match &self.scheme {
            Scheme::OneVsRest { platt: None, .. } => return Ok(None),
            Scheme::OneVsRest {
                platt: Some(platt), ..
            } => {
                let scores: Vec<f64> =
                    dec.iter().zip(platt).map(|(f, p)| p.probability(*f)).collect();
                let total: f64 = scores.iter().sum();
                if !(total > 0.0) || !total.is_finite() {
                    return Err(InferenceError::NonFinite {
                        what: "calibrated score",
                    });
                }
                scores.into_iter().map(|s| s / total).collect()
            }
            Scheme::OneVsOne(m) => match m.probabilities(dec) {
                Some(proba) => proba,
                None => return Ok(None),
            },
        };
        if proba.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::NonFinite {
                what: "calibrated score",
            });
        }
        Ok(Some(proba))
    }
}

impl Classifier for SvmClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::SupportVector
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict_index(&self, x: &[f64]) -> Result<usize, InferenceError> {
        self.index_from(&self.decision_values(x))
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
        if !self.has_probability() {
            return Ok(None);
        }
        self.proba_from(&self.decision_values(x))
    }

    /// The label comes from the decision values (votes for one-vs-one), not
    /// from the calibrated distribution, so the two can disagree
    fn predict_with_proba(&self, x: &[f64]) -> Result<(usize, Option<Vec<f64>>), InferenceError> {
        let dec = self.decision_values(x);
        Ok((self.index_from(&dec)?, self.proba_from(&dec)?))
    }
}
