use crate::error::{Result, SnakeError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Grid environment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub grid_width: i32,
    pub grid_height: i32,
    /// Timeout multiplier: an episode ends once steps without food exceed this times the snake length.
    pub max_steps_without_food: usize,
    pub seed: Option<u64>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            // 800x600 board with 20px cells
            grid_width: 40,
            grid_height: 30,
            max_steps_without_food: 100,
            seed: None,
        }
    }
}

impl EnvConfig {
    pub fn new(grid_width: i32, grid_height: i32) -> Self {
        Self { grid_width, grid_height, ..Default::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_width <= 0 || self.grid_height <= 0 {
            return Err(SnakeError::InvalidConfig(format!(
                "grid must be non-empty, got {}x{}",
                self.grid_width, self.grid_height
            )));
        }
        if self.max_steps_without_food == 0 {
            return Err(SnakeError::InvalidConfig("max_steps_without_food must be positive".into()));
        }
        Ok(())
    }
}

/// Hyperparameters for the DQN agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub state_size: usize,
    pub action_size: usize,
    /// Hidden layer widths of the Q-network.
    pub hidden: Vec<usize>,
    pub memory_size: usize,
    pub batch_size: usize,
    pub gamma: f32,
    pub epsilon: f32,
    pub epsilon_min: f32,
    pub epsilon_decay: f32,
    /// Number of initial learn calls that use `fast_epsilon_decay` instead of `epsilon_decay`.
    pub fast_decay_steps: u64,
    pub fast_epsilon_decay: f32,
    pub learning_rate: f32,
    /// Hard-sync the target network every this many learn calls.
    pub update_target_freq: u64,
    /// Probability of following the food direction while exploring.
    pub food_bias: f32,
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_size: crate::game_input::STATE_SIZE,
            action_size: 3,
            hidden: vec![32, 64, 32],
            memory_size: 10_000,
            batch_size: 64,
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.99,
            fast_decay_steps: 100,
            fast_epsilon_decay: 0.98,
            learning_rate: 0.001,
            update_target_freq: 5,
            food_bias: 0.75,
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden.len() + 2);
        sizes.push(self.state_size);
        sizes.extend_from_slice(&self.hidden);
        sizes.push(self.action_size);
        sizes
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.memory_size == 0 {
            return Err(SnakeError::InvalidConfig("batch_size and memory_size must be positive".into()));
        }
        if self.batch_size > self.memory_size {
            return Err(SnakeError::InvalidConfig(format!(
                "batch_size {} exceeds memory_size {}",
                self.batch_size, self.memory_size
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(SnakeError::InvalidConfig(format!("gamma {} outside [0, 1]", self.gamma)));
        }
        if self.epsilon_min > self.epsilon {
            return Err(SnakeError::InvalidConfig("epsilon_min must not exceed epsilon".into()));
        }
        if self.update_target_freq == 0 {
            return Err(SnakeError::InvalidConfig("update_target_freq must be positive".into()));
        }
        if self.action_size != 3 || self.state_size != crate::game_input::STATE_SIZE {
            return Err(SnakeError::InvalidConfig(format!(
                "network shape must be {} -> 3",
                crate::game_input::STATE_SIZE
            )));
        }
        Ok(())
    }
}

/// Settings for the episode loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub episodes: usize,
    pub max_steps: usize,
    /// Checkpoint and export every this many episodes (0 disables).
    pub save_freq: usize,
    /// Throttle every this many episodes for visualisation (0 disables).
    pub render_freq: usize,
    pub step_delay_ms: u64,
    pub model_path: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub continue_training: bool,
    pub avg_window: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            episodes: 1000,
            max_steps: 2000,
            save_freq: 100,
            render_freq: 0,
            step_delay_ms: 100,
            model_path: PathBuf::from("models/snake_dqn.json"),
            log_dir: PathBuf::from("data"),
            db_path: None,
            continue_training: true,
            avg_window: 100,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(SnakeError::InvalidConfig("max_steps must be positive".into()));
        }
        if self.avg_window == 0 {
            return Err(SnakeError::InvalidConfig("avg_window must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EnvConfig::default().validate().unwrap();
        AgentConfig::default().validate().unwrap();
        TrainerConfig::default().validate().unwrap();
    }

    #[test]
    fn layer_sizes_wrap_hidden_layers() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.layer_sizes(), vec![11, 32, 64, 32, 3]);
    }

    #[test]
    fn rejects_batch_larger_than_memory() {
        let cfg = AgentConfig { batch_size: 128, memory_size: 64, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SnakeError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_empty_grid() {
        assert!(EnvConfig::new(0, 10).validate().is_err());
    }
}
