/// agent, replay memory, target network, learning

use crate::config::AgentConfig;
use crate::error::{Result, SnakeError};
use crate::game::Action;
use crate::game_input::{FOOD_DOWN, FOOD_LEFT, FOOD_RIGHT, FOOD_UP, FeatureVector};
use crate::log;
use crate::network::{Mlp, Parameters, QNetwork};
use crate::replay_buffer::{ReplayBuffer, Transition};
use crate::utils::{argmax, has_non_finite};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, warn};

/// Online network (trained) and target network (periodic snapshot of the online one).
pub struct ValueFunctionPair<N: QNetwork> {
    pub online: N,
    pub target: N,
}

impl<N: QNetwork> ValueFunctionPair<N> {
    /// Starts both networks from the online network's parameters.
    pub fn new(online: N, mut target: N) -> Result<Self> {
        target.set_parameters(&online.parameters())?;
        Ok(Self { online, target })
    }

    /// Hard copy online -> target.
    pub fn sync(&mut self) -> Result<()> {
        self.target.set_parameters(&self.online.parameters())
    }

    /// Loads parameters into the online network and mirrors them into the target.
    pub fn load(&mut self, params: &Parameters) -> Result<()> {
        self.online.set_parameters(params)?;
        self.target.set_parameters(params)
    }
}

/// DQN agent with epsilon-greedy exploration biased towards food.
pub struct DqnAgent<N: QNetwork = Mlp> {
    cfg: AgentConfig,
    pair: ValueFunctionPair<N>,
    memory: ReplayBuffer,
    rng: StdRng, // exploration + minibatch sampling
    epsilon: f32,
    train_count: u64,
    last_loss: f32,
    losses: Vec<f32>, // since the last take_losses()
}

impl DqnAgent<Mlp> {
    /// Fresh agent with the bundled MLP backend.
    pub fn new(cfg: AgentConfig) -> Result<Self> {
        let mut rng = seeded(cfg.seed);
        let sizes = cfg.layer_sizes();
        let online = Mlp::new(&sizes, cfg.learning_rate, &mut rng);
        let target = Mlp::new(&sizes, cfg.learning_rate, &mut rng);
        Self::with_networks(cfg, online, target, rng)
    }
}

impl<N: QNetwork> DqnAgent<N> {
    pub fn with_networks(cfg: AgentConfig, online: N, target: N, rng: StdRng) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            pair: ValueFunctionPair::new(online, target)?,
            memory: ReplayBuffer::new(cfg.memory_size),
            rng,
            epsilon: cfg.epsilon,
            train_count: 0,
            last_loss: 0.0,
            losses: Vec::new(),
            cfg,
        })
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn train_count(&self) -> u64 {
        self.train_count
    }

    pub fn last_loss(&self) -> f32 {
        self.last_loss
    }

    #[cfg(test)]
    pub fn losses(&self) -> &[f32] {
        &self.losses
    }

    /// Drains the loss history, e.g. once per episode.
    pub fn take_losses(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.losses)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn networks(&self) -> &ValueFunctionPair<N> {
        &self.pair
    }

    /// Resume point from a checkpoint.
    pub fn restore_progress(&mut self, epsilon: f32, train_count: u64) {
        self.epsilon = epsilon.clamp(self.cfg.epsilon_min, 1.0);
        self.train_count = train_count;
    }

    pub fn load_parameters(&mut self, params: &Parameters) -> Result<()> {
        self.pair.load(params)
    }

    /// Epsilon-greedy action; exploration leans towards the food.
    pub fn act(&mut self, state: &FeatureVector, explore: bool) -> usize {
        if explore && self.rng.r#gen::<f32>() < self.epsilon {
            return self.explore(state);
        }
        let q = self.pair.online.predict(state);
        if has_non_finite(&q) {
            warn!(?q, "Q contains NaN/Inf in act, falling back to a random action");
            return self.rng.gen_range(0..self.cfg.action_size);
        }
        argmax(&q)
    }

    /// Pure exploitation for play/evaluation; refuses to act on broken Q-values.
    pub fn greedy(&self, state: &FeatureVector) -> Result<usize> {
        let q = self.pair.online.predict(state);
        if has_non_finite(&q) {
            return Err(SnakeError::NonFiniteQ);
        }
        Ok(argmax(&q))
    }

    fn explore(&mut self, state: &FeatureVector) -> usize {
        let mut food_dirs = Vec::with_capacity(3);
        if state[FOOD_LEFT] > 0.5 {
            food_dirs.push(Action::TurnLeft.index());
        }
        if state[FOOD_RIGHT] > 0.5 {
            food_dirs.push(Action::TurnRight.index());
        }
        if state[FOOD_UP] > 0.5 || state[FOOD_DOWN] > 0.5 {
            food_dirs.push(Action::Straight.index());
        }
        if !food_dirs.is_empty() && self.rng.r#gen::<f32>() < self.cfg.food_bias {
            return food_dirs[self.rng.gen_range(0..food_dirs.len())];
        }
        self.rng.gen_range(0..self.cfg.action_size)
    }

    pub fn remember(&mut self, transition: Transition) {
        self.memory.push(transition);
    }

    /// One training step on a sampled minibatch. Returns the loss, or 0 while the
    /// replay memory holds fewer than `batch_size` transitions.
    pub fn learn(&mut self) -> f32 {
        let batch_size = self.cfg.batch_size;
        if !self.memory.is_ready(batch_size) {
            return 0.0;
        }
        let batch = match self.memory.sample(batch_size, &mut self.rng) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("learn skipped: {}", e);
                return 0.0;
            }
        };

        let mut states = Array2::<f32>::zeros((batch_size, self.cfg.state_size));
        let mut next_states = Array2::<f32>::zeros((batch_size, self.cfg.state_size));
        for (i, t) in batch.iter().enumerate() {
            states.row_mut(i).assign(&ArrayView1::from(&t.state[..]));
            next_states.row_mut(i).assign(&ArrayView1::from(&t.next_state[..]));
        }

        // Bellman targets: online prediction with the taken action overwritten,
        // bootstrapped from the target network.
        let mut targets = self.pair.online.predict_batch(states.view());
        let next_q = self.pair.target.predict_batch(next_states.view());
        for (i, t) in batch.iter().enumerate() {
            targets[[i, t.action]] = if t.done {
                t.reward
            } else {
                let max_next = next_q.row(i).iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                t.reward + self.cfg.gamma * max_next
            };
        }

        let loss = self.pair.online.fit(states.view(), targets.view());
        if !loss.is_finite() {
            error!("non-finite loss after train step {}", self.train_count);
        }
        self.last_loss = loss;
        self.losses.push(loss);

        self.decay_epsilon();

        self.train_count += 1;
        if self.train_count % self.cfg.update_target_freq == 0 {
            self.sync_target();
        }

        log::scalar(self.train_count, "loss", loss);
        log::scalar(self.train_count, "epsilon", self.epsilon);
        loss
    }

    /// Faster multiplicative decay during the first learn calls, clamped at `epsilon_min`.
    fn decay_epsilon(&mut self) {
        if self.epsilon > self.cfg.epsilon_min {
            let factor = if self.train_count < self.cfg.fast_decay_steps {
                self.cfg.fast_epsilon_decay
            } else {
                self.cfg.epsilon_decay
            };
            self.epsilon = (self.epsilon * factor).max(self.cfg.epsilon_min);
        }
    }

    pub fn sync_target(&mut self) {
        match self.pair.sync() {
            Ok(()) => debug!(train_count = self.train_count, "target network synced"),
            Err(e) => error!("target sync failed: {}", e),
        }
    }
}

pub fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
