//! Q-value function approximators.
//!
//! The agent only talks to [`QNetwork`]; [`Mlp`] is the bundled dense backend.

use crate::error::{Result, SnakeError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What the agent needs from a value network.
pub trait QNetwork: Send + Sync {
    /// Q-values for a batch of states, one row per state.
    fn predict_batch(&self, states: ArrayView2<f32>) -> Array2<f32>;

    /// One optimisation pass over a batch; returns the loss before the update.
    fn fit(&mut self, states: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32;

    fn parameters(&self) -> Parameters;

    fn set_parameters(&mut self, params: &Parameters) -> Result<()>;

    fn predict(&self, state: &[f32]) -> Vec<f32> {
        let batch = ArrayView1::from(state).insert_axis(Axis(0));
        self.predict_batch(batch).row(0).to_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    pub weights: Array2<f32>, // (inputs, outputs)
    pub biases: Array1<f32>,
}

/// Exact copy of every weight and bias, used for target sync and checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub layers: Vec<DenseParams>,
}

impl Parameters {
    /// `[inputs, hidden.., outputs]`
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers.len() + 1);
        if let Some(first) = self.layers.first() {
            sizes.push(first.weights.nrows());
        }
        sizes.extend(self.layers.iter().map(|l| l.weights.ncols()));
        sizes
    }

    fn same_shape(&self, other: &Parameters) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.weights.dim() == b.weights.dim() && a.biases.dim() == b.biases.dim())
    }
}

/// Adam moments for every layer.
#[derive(Clone, Debug)]
struct Adam {
    m_w: Vec<Array2<f32>>,
    v_w: Vec<Array2<f32>>,
    m_b: Vec<Array1<f32>>,
    v_b: Vec<Array1<f32>>,
    t: i32,
}

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-7;

impl Adam {
    fn new(params: &Parameters) -> Self {
        Self {
            m_w: params.layers.iter().map(|l| Array2::zeros(l.weights.dim())).collect(),
            v_w: params.layers.iter().map(|l| Array2::zeros(l.weights.dim())).collect(),
            m_b: params.layers.iter().map(|l| Array1::zeros(l.biases.dim())).collect(),
            v_b: params.layers.iter().map(|l| Array1::zeros(l.biases.dim())).collect(),
            t: 0,
        }
    }
}

/// Fully connected network: ReLU hidden layers, linear output, MSE loss, Adam.
#[derive(Clone, Debug)]
pub struct Mlp {
    params: Parameters,
    adam: Adam,
    lr: f32,
}

impl Mlp {
    /// Glorot-uniform weights, zero biases.
    pub fn new<R: Rng>(layer_sizes: &[usize], lr: f32, rng: &mut R) -> Self {
        assert!(layer_sizes.len() >= 2, "network needs an input and an output layer");
        let layers = layer_sizes
            .windows(2)
            .map(|w| {
                let (fan_in, fan_out) = (w[0], w[1]);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                DenseParams {
                    weights: Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit)),
                    biases: Array1::zeros(fan_out),
                }
            })
            .collect();
        let params = Parameters { layers };
        let adam = Adam::new(&params);
        Self { params, adam, lr }
    }

    /// Pre-activations and activations of every layer (activations[0] is the input).
    fn forward_trace(&self, x: ArrayView2<f32>) -> (Vec<Array2<f32>>, Vec<Array2<f32>>) {
        let last = self.params.layers.len() - 1;
        let mut activations = vec![x.to_owned()];
        let mut pre = Vec::with_capacity(self.params.layers.len());
        for (i, layer) in self.params.layers.iter().enumerate() {
            let z = activations[i].dot(&layer.weights) + &layer.biases;
            let a = if i == last { z.clone() } else { z.mapv(relu) };
            pre.push(z);
            activations.push(a);
        }
        (pre, activations)
    }
}

fn relu(x: f32) -> f32 {
    x.max(0.0)
}

fn relu_derivative(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else { 0.0 }
}

impl QNetwork for Mlp {
    fn predict_batch(&self, states: ArrayView2<f32>) -> Array2<f32> {
        let last = self.params.layers.len() - 1;
        let mut a = states.to_owned();
        for (i, layer) in self.params.layers.iter().enumerate() {
            let z = a.dot(&layer.weights) + &layer.biases;
            a = if i == last { z } else { z.mapv(relu) };
        }
        a
    }

    fn fit(&mut self, states: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32 {
        let (pre, activations) = self.forward_trace(states);
        let output = &activations[activations.len() - 1];
        let diff = output - &targets;
        let n = diff.len() as f32;
        let loss = diff.mapv(|d| d * d).sum() / n;

        // dL/dz of the linear output layer
        let mut delta = diff.mapv(|d| 2.0 * d / n);
        let mut grads_w = Vec::with_capacity(self.params.layers.len());
        let mut grads_b = Vec::with_capacity(self.params.layers.len());
        for l in (0..self.params.layers.len()).rev() {
            grads_w.push(activations[l].t().dot(&delta));
            grads_b.push(delta.sum_axis(Axis(0)));
            if l > 0 {
                delta = delta.dot(&self.params.layers[l].weights.t()) * pre[l - 1].mapv(relu_derivative);
            }
        }
        grads_w.reverse();
        grads_b.reverse();

        self.adam.t += 1;
        let bc1 = 1.0 - BETA1.powi(self.adam.t);
        let bc2 = 1.0 - BETA2.powi(self.adam.t);
        let lr = self.lr;
        for (l, layer) in self.params.layers.iter_mut().enumerate() {
            let (m, v) = (&mut self.adam.m_w[l], &mut self.adam.v_w[l]);
            adam_update(&mut layer.weights, &grads_w[l], m, v, lr, bc1, bc2);
            let (m, v) = (&mut self.adam.m_b[l], &mut self.adam.v_b[l]);
            adam_update(&mut layer.biases, &grads_b[l], m, v, lr, bc1, bc2);
        }
        loss
    }

    fn parameters(&self) -> Parameters {
        self.params.clone()
    }

    fn set_parameters(&mut self, params: &Parameters) -> Result<()> {
        if !self.params.same_shape(params) {
            return Err(SnakeError::IncompatibleCheckpoint {
                expected: format!("{:?}", self.params.layer_sizes()),
                found: format!("{:?}", params.layer_sizes()),
            });
        }
        self.params = params.clone();
        Ok(())
    }
}

fn adam_update<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f32, D>,
    grad: &ndarray::Array<f32, D>,
    m: &mut ndarray::Array<f32, D>,
    v: &mut ndarray::Array<f32, D>,
    lr: f32,
    bc1: f32,
    bc2: f32,
) {
    m.zip_mut_with(grad, |m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
    v.zip_mut_with(grad, |v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);
    ndarray::Zip::from(param).and(&*m).and(&*v).for_each(|p, &m, &v| {
        let m_hat = m / bc1;
        let v_hat = v / bc2;
        *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn net(seed: u64) -> Mlp {
        Mlp::new(&[11, 16, 8, 3], 0.01, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn output_shape_matches_actions() {
        let n = net(0);
        let q = n.predict(&[0.0; 11]);
        assert_eq!(q.len(), 3);
        assert_eq!(n.parameters().layer_sizes(), vec![11, 16, 8, 3]);
    }

    #[test]
    fn fit_reduces_loss_on_fixed_batch() {
        let mut n = net(1);
        let states = Array2::from_shape_fn((4, 11), |(i, j)| if j == i || j == i + 5 { 1.0 } else { 0.0 });
        let targets = array![[1.0, 0.0, -1.0], [0.5, 0.5, 0.5], [-1.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let first = n.fit(states.view(), targets.view());
        let mut last = first;
        for _ in 0..300 {
            last = n.fit(states.view(), targets.view());
        }
        assert!(last < first * 0.5, "loss {} -> {}", first, last);
    }

    #[test]
    fn copied_parameters_predict_identically() {
        let mut a = net(2);
        let mut b = net(3);
        let x = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let states = Array2::from_shape_fn((2, 11), |(_, j)| x[j]);
        let targets = Array2::from_elem((2, 3), 0.3);
        a.fit(states.view(), targets.view());
        assert_ne!(a.predict(&x), b.predict(&x));
        b.set_parameters(&a.parameters()).unwrap();
        assert_eq!(a.predict(&x), b.predict(&x));
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut a = net(0);
        let other = Mlp::new(&[11, 4, 3], 0.01, &mut StdRng::seed_from_u64(0));
        let err = a.set_parameters(&other.parameters()).unwrap_err();
        assert!(matches!(err, SnakeError::IncompatibleCheckpoint { .. }));
    }
}
