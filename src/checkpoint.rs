use crate::config::EnvConfig;
use crate::dqn::DqnAgent;
use crate::error::{Result, SnakeError};
use crate::network::{Parameters, QNetwork};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    pub episode: usize,
    pub epsilon: f32,
    pub train_count: u64,
    pub layer_sizes: Vec<usize>,
    pub grid_width: i32,
    pub grid_height: i32,
    pub version: u32,
    pub saved_at: DateTime<Utc>,
}

/// Saved model: online network parameters plus enough metadata to resume training.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub parameters: Parameters,
}

impl Checkpoint {
    pub fn capture<N: QNetwork>(agent: &DqnAgent<N>, episode: usize, env: &EnvConfig) -> Self {
        let parameters = agent.networks().online.parameters();
        Self {
            meta: CheckpointMeta {
                episode,
                epsilon: agent.epsilon(),
                train_count: agent.train_count(),
                layer_sizes: parameters.layer_sizes(),
                grid_width: env.grid_width,
                grid_height: env.grid_height,
                version: CHECKPOINT_VERSION,
                saved_at: Utc::now(),
            },
            parameters,
        }
    }

    /// Writes JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let ckpt: Checkpoint = serde_json::from_reader(reader)?;
        if ckpt.meta.version != CHECKPOINT_VERSION {
            return Err(SnakeError::IncompatibleCheckpoint {
                expected: format!("version {}", CHECKPOINT_VERSION),
                found: format!("version {}", ckpt.meta.version),
            });
        }
        Ok(ckpt)
    }

    /// Loads the parameters into both networks and restores epsilon / train_count.
    pub fn apply<N: QNetwork>(&self, agent: &mut DqnAgent<N>) -> Result<()> {
        let expected = agent.config().layer_sizes();
        if self.meta.layer_sizes != expected || self.parameters.layer_sizes() != expected {
            return Err(SnakeError::IncompatibleCheckpoint {
                expected: format!("{:?}", expected),
                found: format!("{:?}", self.parameters.layer_sizes()),
            });
        }
        agent.load_parameters(&self.parameters)?;
        agent.restore_progress(self.meta.epsilon, self.meta.train_count);
        Ok(())
    }
}

/// `models/snake_dqn.json` -> `models/snake_dqn_<episode>.json`
pub fn periodic_path(model_path: &Path, episode: usize) -> PathBuf {
    let stem = model_path.file_stem().and_then(|s| s.to_str()).unwrap_or("model");
    let ext = model_path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    model_path.with_file_name(format!("{}_{}.{}", stem, episode, ext))
}

/// Best-effort resume: a missing or unusable checkpoint leaves the agent untouched.
pub fn try_resume<N: QNetwork>(agent: &mut DqnAgent<N>, path: &Path) -> Option<CheckpointMeta> {
    if !path.exists() {
        info!("no checkpoint at {}, starting fresh", path.display());
        return None;
    }
    match Checkpoint::load(path).and_then(|ckpt| ckpt.apply(agent).map(|_| ckpt.meta)) {
        Ok(meta) => {
            info!(
                "resumed from {} (episode {}, epsilon {:.3}, train_count {})",
                path.display(),
                meta.episode,
                meta.epsilon,
                meta.train_count
            );
            Some(meta)
        }
        Err(e) => {
            warn!("could not load {}: {}; starting fresh", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::replay_buffer::Transition;

    fn agent(seed: u64, hidden: Vec<usize>) -> DqnAgent {
        DqnAgent::new(AgentConfig { hidden, batch_size: 4, memory_size: 50, seed: Some(seed), ..Default::default() })
            .unwrap()
    }

    fn trained(seed: u64) -> DqnAgent {
        let mut a = agent(seed, vec![8, 8]);
        for i in 0..6 {
            a.remember(Transition { state: [0.5; 11], action: i % 3, reward: 1.0, next_state: [0.0; 11], done: i == 5 });
        }
        for _ in 0..7 {
            a.learn();
        }
        a
    }

    #[test]
    fn resume_restores_networks_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let src = trained(1);
        Checkpoint::capture(&src, 12, &EnvConfig::default()).save(&path).unwrap();

        let mut dst = agent(2, vec![8, 8]);
        let meta = try_resume(&mut dst, &path).unwrap();
        assert_eq!(meta.episode, 12);
        assert_eq!(dst.epsilon(), src.epsilon());
        assert_eq!(dst.train_count(), 7);

        let probe = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        assert_eq!(dst.networks().online.predict(&probe), src.networks().online.predict(&probe));
        assert_eq!(dst.networks().target.parameters(), dst.networks().online.parameters());
    }

    #[test]
    fn incompatible_shapes_start_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        Checkpoint::capture(&trained(1), 3, &EnvConfig::default()).save(&path).unwrap();

        let mut other = agent(3, vec![16]);
        let before = other.networks().online.parameters();
        let ckpt = Checkpoint::load(&path).unwrap();
        assert!(matches!(ckpt.apply(&mut other), Err(SnakeError::IncompatibleCheckpoint { .. })));
        assert!(try_resume(&mut other, &path).is_none());
        assert_eq!(other.networks().online.parameters(), before);
        assert_eq!(other.epsilon(), 1.0);
    }

    #[test]
    fn missing_or_garbage_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = agent(0, vec![8]);
        assert!(try_resume(&mut a, &dir.path().join("absent.json")).is_none());

        let junk = dir.path().join("junk.json");
        fs::write(&junk, "{not json").unwrap();
        assert!(matches!(Checkpoint::load(&junk), Err(SnakeError::Json(_))));
        assert!(try_resume(&mut a, &junk).is_none());
    }

    #[test]
    fn periodic_name_keeps_directory_and_extension() {
        let p = periodic_path(Path::new("models/snake_dqn.json"), 300);
        assert_eq!(p, PathBuf::from("models/snake_dqn_300.json"));
    }
}
