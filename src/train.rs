use crate::checkpoint::{self, Checkpoint};
use crate::config::{AgentConfig, EnvConfig, TrainerConfig};
use crate::control::SharedState;
use crate::db::EpisodeLog;
use crate::dqn::DqnAgent;
use crate::error::Result;
use crate::game::{Action, Game, StepInfo};
use crate::log;
use crate::metrics::{EndReason, EpisodeSummary, TrainingMetrics};
use crate::network::{Mlp, QNetwork};
use crate::replay_buffer::Transition;
use crate::utils::vec_stats;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runs episodes of act -> step -> remember -> learn and keeps the books.
pub struct Trainer<N: QNetwork = Mlp> {
    cfg: TrainerConfig,
    env_cfg: EnvConfig,
    game: Game,
    agent: DqnAgent<N>,
    metrics: TrainingMetrics,
    db: Option<EpisodeLog>,
    shared: Option<Arc<SharedState>>,
    episode_offset: usize, // episodes already done by a resumed checkpoint
}

impl Trainer<Mlp> {
    /// Builds a fresh agent and, with `continue_training`, resumes from `model_path` if possible.
    pub fn new(cfg: TrainerConfig, env_cfg: EnvConfig, agent_cfg: AgentConfig) -> Result<Self> {
        let agent = DqnAgent::new(agent_cfg)?;
        let mut trainer = Self::with_agent(cfg, env_cfg, agent)?;
        if trainer.cfg.continue_training {
            if let Some(meta) = checkpoint::try_resume(&mut trainer.agent, &trainer.cfg.model_path) {
                trainer.episode_offset = meta.episode;
            }
        } else {
            info!("fresh start requested, ignoring {}", trainer.cfg.model_path.display());
        }
        Ok(trainer)
    }
}

impl<N: QNetwork> Trainer<N> {
    pub fn with_agent(cfg: TrainerConfig, env_cfg: EnvConfig, agent: DqnAgent<N>) -> Result<Self> {
        cfg.validate()?;
        env_cfg.validate()?;
        let db = match &cfg.db_path {
            Some(path) => Some(EpisodeLog::open(path)?),
            None => None,
        };
        Ok(Self {
            game: Game::new(&env_cfg),
            metrics: TrainingMetrics::new(cfg.avg_window),
            cfg,
            env_cfg,
            agent,
            db,
            shared: None,
            episode_offset: 0,
        })
    }

    /// Publish progress to (and take pause/stop/speed from) a dashboard.
    pub fn attach(&mut self, shared: Arc<SharedState>) {
        self.shared = Some(shared);
    }

    #[cfg(test)]
    pub fn agent(&self) -> &DqnAgent<N> {
        &self.agent
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn train(&mut self) -> Result<()> {
        let total = self.cfg.episodes;
        let print_freq = (total / 10).max(1);
        let start = Instant::now();

        info!(
            "training for {} episodes, model {}, timeout multiplier {}",
            total,
            self.cfg.model_path.display(),
            self.env_cfg.max_steps_without_food
        );
        self.shared_log(format!("Training for {} episodes", total));

        for e in 1..=total {
            let summary = self.run_episode(e);
            let cancelled = summary.end_reason == EndReason::Cancelled;
            self.finish_episode(summary.clone());

            if e % print_freq == 0 || e == total {
                let line = format!(
                    "Episode: {:4}/{:4} | Score: {:3} | Avg Score: {:5.2} | Epsilon: {:.4} | Timeouts: {} | Memory: {} | Loss: {:.4}",
                    e,
                    total,
                    summary.score,
                    self.metrics.last_avg(),
                    self.agent.epsilon(),
                    self.metrics.timeouts,
                    self.agent.memory_len(),
                    self.agent.last_loss()
                );
                info!("{}", line);
                self.shared_log(line);
            }

            if self.cfg.save_freq > 0 && e % self.cfg.save_freq == 0 {
                self.save_point(e, start.elapsed());
            }

            if cancelled {
                warn!("training stopped at episode {}", e);
                self.shared_log(format!("Training stopped at episode {}", e));
                break;
            }
        }

        let done = self.metrics.len();
        Checkpoint::capture(&self.agent, self.episode_offset + done, &self.env_cfg).save(&self.cfg.model_path)?;
        info!("final model saved to {}", self.cfg.model_path.display());
        self.metrics.export_csv(&self.cfg.log_dir, None)?;

        let elapsed = start.elapsed();
        let scores = vec_stats(&self.metrics.scores());
        info!(
            "total training time {}, {:.2}s per episode, timeouts {}/{} ({:.1}%), score min {} max {} mean {:.2}, best {}",
            hms(elapsed),
            elapsed.as_secs_f32() / done.max(1) as f32,
            self.metrics.timeouts,
            done,
            self.metrics.timeout_pct(),
            scores.min,
            scores.max,
            scores.mean,
            self.metrics.best_score()
        );
        if let Some(db) = &self.db {
            match db.best_score() {
                Ok(best) => info!("episode log run {}: best score over all runs {:?}", db.run(), best),
                Err(e) => warn!("episode log query failed: {}", e),
            }
        }
        if let Some(shared) = &self.shared {
            shared.update(true, |s| s.running = false);
        }
        Ok(())
    }

    /// Plays one training episode; `episode` is 1-based.
    pub fn run_episode(&mut self, episode: usize) -> EpisodeSummary {
        let mut state = self.game.reset();
        let mut total_reward = 0.0;
        let mut steps = 0;
        let mut end_reason = EndReason::StepLimit;
        let throttle = self.cfg.render_freq > 0 && episode % self.cfg.render_freq == 0;

        self.publish(episode, 0, None, true);

        for step in 0..self.cfg.max_steps {
            if let Some(shared) = &self.shared {
                if !shared.control.checkpoint() {
                    end_reason = EndReason::Cancelled;
                    break;
                }
            }

            let action = self.agent.act(&state, true);
            let result = self.game.step(Action::from_index(action));
            self.agent.remember(Transition {
                state,
                action,
                reward: result.reward,
                next_state: result.state,
                done: result.done,
            });
            state = result.state;
            total_reward += result.reward;
            steps = step + 1;

            self.agent.learn();

            self.publish(episode, step, Some(&result.info), result.done);

            if throttle {
                let speed = self.shared.as_ref().map(|s| s.control.speed()).unwrap_or(1.0);
                thread::sleep(Duration::from_secs_f32(self.cfg.step_delay_ms as f32 / 1000.0 / speed));
            }

            if result.done {
                end_reason = if result.info.timeout {
                    EndReason::Timeout
                } else if result.info.collision {
                    EndReason::Collision
                } else {
                    EndReason::BoardFilled
                };
                break;
            }
        }
        // only learn calls that actually trained
        let losses = self.agent.take_losses();
        let mean_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f32>() / losses.len() as f32 };
        EpisodeSummary {
            episode: self.episode_offset + episode,
            score: self.game.score(),
            steps,
            total_reward,
            mean_loss,
            epsilon: self.agent.epsilon(),
            end_reason,
        }
    }

    fn finish_episode(&mut self, summary: EpisodeSummary) {
        match summary.end_reason {
            EndReason::Timeout => {
                self.shared_log(format!(
                    "Episode {} timeout! Total timeouts: {}",
                    summary.episode,
                    self.metrics.timeouts + 1
                ));
            }
            EndReason::BoardFilled => info!("episode {} filled the board", summary.episode),
            _ => {}
        }
        if let Some(db) = &self.db {
            if let Err(e) = db.insert(&summary) {
                warn!("episode log write failed: {}", e);
            }
        }

        let step = summary.episode as u64;
        log::scalar(step, "score", summary.score as f32);
        log::scalar(step, "mean_loss", summary.mean_loss);

        let avg = self.metrics.record(summary.clone());
        log::scalar(step, "avg_score", avg);

        if let Some(shared) = &self.shared {
            let (epsilon, timeouts) = (self.agent.epsilon(), self.metrics.timeouts);
            shared.update(true, |s| {
                s.score = summary.score;
                s.avg_score = avg;
                s.epsilon = epsilon;
                s.timeouts = timeouts;
                s.scores.push(summary.score as f32);
                s.avg_scores.push(avg);
                s.epsilons.push(epsilon);
                s.losses.push(summary.mean_loss);
            });
        }
    }

    fn save_point(&mut self, e: usize, elapsed: Duration) {
        let episode = self.episode_offset + e;
        let path = checkpoint::periodic_path(&self.cfg.model_path, episode);
        match Checkpoint::capture(&self.agent, episode, &self.env_cfg).save(&path) {
            Ok(()) => self.shared_log(format!("Model checkpoint saved to {}", path.display())),
            Err(err) => warn!("checkpoint {} failed: {}", path.display(), err),
        }
        if let Err(err) = self.metrics.export_csv(&self.cfg.log_dir, Some(episode)) {
            warn!("metrics export failed: {}", err);
        }

        let per_episode = elapsed.as_secs_f32() / e as f32;
        let remaining = per_episode * self.cfg.episodes.saturating_sub(e) as f32;
        info!(
            "avg time per episode {:.2}s, ETA {}, timeouts {}/{} ({:.1}%)",
            per_episode,
            hms(Duration::from_secs_f32(remaining)),
            self.metrics.timeouts,
            e,
            self.metrics.timeout_pct()
        );
    }

    fn publish(&self, episode: usize, step: usize, info: Option<&StepInfo>, force: bool) {
        let Some(shared) = &self.shared else { return };

        if step == 0 && info.is_none() {
            shared.log(format!("Starting episode {}/{}", episode, self.cfg.episodes));
        }
        if let Some(info) = info {
            if info.ate_food {
                shared.log(format!("Episode {}: Snake ate food! Score: {}", episode, info.score));
            }
            if info.collision {
                shared.log(format!("Episode {} ended - Snake collision. Final score: {}", episode, info.score));
            }
        }

        let view = self.game.snapshot();
        let (epsilon, total_steps, total) = (self.agent.epsilon(), self.game.total_steps(), self.cfg.episodes);
        shared.update(force, |s| {
            s.running = true;
            s.episode = episode;
            s.total_episodes = total;
            s.score = view.score;
            s.epsilon = epsilon;
            s.step = step;
            s.total_steps = total_steps;
            s.game = Some(view);
        });
    }

    fn shared_log(&self, message: String) {
        match &self.shared {
            Some(shared) => shared.log(message),
            None => info!("{}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub scores: Vec<u32>,
    pub steps: Vec<usize>,
    pub average: f32,
}

/// Greedy play on independent boards in parallel; no exploration, no learning.
pub fn evaluate<N: QNetwork>(
    agent: &DqnAgent<N>,
    env_cfg: &EnvConfig,
    episodes: usize,
    max_steps: usize,
) -> Result<EvalReport> {
    let runs = (0..episodes)
        .into_par_iter()
        .map(|i| -> Result<(u32, usize)> {
            let cfg = EnvConfig { seed: env_cfg.seed.map(|s| s.wrapping_add(i as u64)), ..env_cfg.clone() };
            let mut game = Game::new(&cfg);
            let mut state = game.state();
            let mut steps = 0;
            while !game.game_over() && steps < max_steps {
                let action = agent.greedy(&state)?;
                state = game.step(Action::from_index(action)).state;
                steps += 1;
            }
            Ok((game.score(), steps))
        })
        .collect::<Result<Vec<_>>>()?;

    let (scores, steps): (Vec<u32>, Vec<usize>) = runs.into_iter().unzip();
    let average = if scores.is_empty() { 0.0 } else { scores.iter().sum::<u32>() as f32 / scores.len() as f32 };
    for (i, (score, n)) in scores.iter().zip(&steps).enumerate() {
        info!("eval episode {}/{} | score {} | steps {}", i + 1, episodes, score, n);
    }
    info!("average score over {} episodes: {:.2}", episodes, average);
    Ok(EvalReport { scores, steps, average })
}

fn hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs(dir: &std::path::Path) -> (TrainerConfig, EnvConfig, AgentConfig) {
        let trainer = TrainerConfig {
            episodes: 6,
            max_steps: 60,
            save_freq: 3,
            model_path: dir.join("models").join("snake.json"),
            log_dir: dir.join("data"),
            db_path: Some(dir.join("episodes.sqlite")),
            continue_training: false,
            ..Default::default()
        };
        let env = EnvConfig { grid_width: 8, grid_height: 8, max_steps_without_food: 5, seed: Some(3) };
        let agent = AgentConfig { batch_size: 8, memory_size: 200, hidden: vec![16], seed: Some(4), ..Default::default() };
        (trainer, env, agent)
    }

    #[test]
    fn short_run_writes_checkpoints_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let (tc, ec, ac) = configs(dir.path());
        let mut trainer = Trainer::new(tc, ec, ac).unwrap();
        trainer.train().unwrap();

        let m = trainer.metrics();
        assert_eq!(m.len(), 6);
        assert_eq!(m.avg_scores.len(), 6);
        assert!(m.episodes.iter().all(|e| e.steps <= 60 && e.end_reason != EndReason::Cancelled));
        assert!(trainer.agent().epsilon() < 1.0);

        let models = dir.path().join("models");
        assert!(models.join("snake.json").exists());
        assert!(models.join("snake_3.json").exists());
        assert!(models.join("snake_6.json").exists());
        assert!(dir.path().join("data").join("training_metrics_ep3.csv").exists());
        assert!(dir.path().join("data").join("training_metrics.csv").exists());

        let db = EpisodeLog::open(&dir.path().join("episodes.sqlite")).unwrap();
        assert!(db.best_score().unwrap().is_some());
    }

    #[test]
    fn continue_picks_up_saved_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (tc, ec, ac) = configs(dir.path());
        let mut first = Trainer::new(tc.clone(), ec.clone(), ac.clone()).unwrap();
        first.train().unwrap();
        let (epsilon, train_count) = (first.agent().epsilon(), first.agent().train_count());

        let resumed = Trainer::new(TrainerConfig { continue_training: true, ..tc }, ec, ac).unwrap();
        assert_eq!(resumed.agent().epsilon(), epsilon);
        assert_eq!(resumed.agent().train_count(), train_count);
        assert_eq!(resumed.episode_offset, 6);
    }

    #[test]
    fn timeouts_are_counted_separately() {
        let dir = tempfile::tempdir().unwrap();
        let (tc, mut ec, ac) = configs(dir.path());
        ec.max_steps_without_food = 1;
        let mut trainer = Trainer::new(TrainerConfig { episodes: 10, save_freq: 0, ..tc }, ec, ac).unwrap();
        trainer.train().unwrap();
        let m = trainer.metrics();
        let timeouts = m.episodes.iter().filter(|e| e.end_reason == EndReason::Timeout).count();
        assert_eq!(m.timeouts, timeouts);
        assert!(m.timeouts + m.collisions <= 10);
    }

    #[test]
    fn stop_flag_cancels_episode() {
        let dir = tempfile::tempdir().unwrap();
        let (tc, ec, ac) = configs(dir.path());
        let mut trainer = Trainer::new(tc, ec, ac).unwrap();
        let shared = Arc::new(SharedState::new());
        shared.control.stop();
        trainer.attach(shared.clone());
        trainer.train().unwrap();

        assert_eq!(trainer.metrics().len(), 1);
        assert_eq!(trainer.metrics().episodes[0].end_reason, EndReason::Cancelled);
        let snap = shared.snapshot();
        assert!(!snap.running);
        assert_eq!(snap.scores.len(), 1);
    }

    #[test]
    fn evaluation_is_greedy_and_bounded() {
        let agent = DqnAgent::new(AgentConfig { hidden: vec![8], seed: Some(1), ..Default::default() }).unwrap();
        let env = EnvConfig { grid_width: 10, grid_height: 10, max_steps_without_food: 3, seed: Some(11) };
        let report = evaluate(&agent, &env, 4, 200).unwrap();
        assert_eq!(report.scores.len(), 4);
        assert!(report.steps.iter().all(|&s| s <= 200));
        let again = evaluate(&agent, &env, 4, 200).unwrap();
        assert_eq!(report.scores, again.scores);
        assert_eq!(report.steps, again.steps);
        assert_eq!(agent.train_count(), 0);
    }
}
