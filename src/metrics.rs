use crate::error::Result;
use crate::utils::trailing_mean;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Why an episode stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Collision,
    Timeout,
    StepLimit,
    BoardFilled,
    Cancelled,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Collision => "collision",
            EndReason::Timeout => "timeout",
            EndReason::StepLimit => "step_limit",
            EndReason::BoardFilled => "board_filled",
            EndReason::Cancelled => "cancelled",
        }
    }

    #[cfg(test)]
    pub fn parse(s: &str) -> Option<EndReason> {
        match s {
            "collision" => Some(EndReason::Collision),
            "timeout" => Some(EndReason::Timeout),
            "step_limit" => Some(EndReason::StepLimit),
            "board_filled" => Some(EndReason::BoardFilled),
            "cancelled" => Some(EndReason::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub score: u32,
    pub steps: usize,
    pub total_reward: f32,
    pub mean_loss: f32,
    pub epsilon: f32,
    pub end_reason: EndReason,
}

/// Per-episode series collected by the trainer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingMetrics {
    pub episodes: Vec<EpisodeSummary>,
    pub avg_scores: Vec<f32>, // trailing mean of scores, same length as `episodes`
    pub timeouts: usize,
    pub collisions: usize,
    window: usize,
}

impl TrainingMetrics {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), ..Default::default() }
    }

    /// Records an episode and returns the updated moving average.
    pub fn record(&mut self, summary: EpisodeSummary) -> f32 {
        match summary.end_reason {
            EndReason::Timeout => self.timeouts += 1,
            EndReason::Collision => self.collisions += 1,
            _ => {}
        }
        self.episodes.push(summary);
        let scores = self.scores();
        let avg = trailing_mean(&scores, self.window);
        self.avg_scores.push(avg);
        avg
    }

    pub fn scores(&self) -> Vec<f32> {
        self.episodes.iter().map(|e| e.score as f32).collect()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn last_avg(&self) -> f32 {
        self.avg_scores.last().copied().unwrap_or(0.0)
    }

    pub fn best_score(&self) -> u32 {
        self.episodes.iter().map(|e| e.score).max().unwrap_or(0)
    }

    /// share of finished episodes that ended by starvation, in percent
    pub fn timeout_pct(&self) -> f32 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        self.timeouts as f32 * 100.0 / self.episodes.len() as f32
    }

    /// Writes `training_metrics.csv`, or `training_metrics_ep<N>.csv` for intermediate exports.
    pub fn export_csv(&self, dir: &Path, episode: Option<usize>) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let name = match episode {
            Some(ep) => format!("training_metrics_ep{}.csv", ep),
            None => "training_metrics.csv".to_string(),
        };
        let path = dir.join(name);
        let mut w = BufWriter::new(File::create(&path)?);
        writeln!(w, "episode,score,avg_score,epsilon,loss,steps,end_reason")?;
        for (e, avg) in self.episodes.iter().zip(&self.avg_scores) {
            writeln!(
                w,
                "{},{},{:.4},{:.6},{:.6},{},{}",
                e.episode, e.score, avg, e.epsilon, e.mean_loss, e.steps, e.end_reason
            )?;
        }
        w.flush()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(episode: usize, score: u32, end_reason: EndReason) -> EpisodeSummary {
        EpisodeSummary { episode, score, steps: 10, total_reward: 0.0, mean_loss: 0.1, epsilon: 0.5, end_reason }
    }

    #[test]
    fn moving_average_uses_window() {
        let mut m = TrainingMetrics::new(2);
        assert_eq!(m.record(summary(1, 2, EndReason::Collision)), 2.0);
        assert_eq!(m.record(summary(2, 4, EndReason::Collision)), 3.0);
        assert_eq!(m.record(summary(3, 8, EndReason::Timeout)), 6.0);
        assert_eq!(m.avg_scores, vec![2.0, 3.0, 6.0]);
        assert_eq!(m.best_score(), 8);
    }

    #[test]
    fn counts_end_reasons() {
        let mut m = TrainingMetrics::new(100);
        m.record(summary(1, 0, EndReason::Timeout));
        m.record(summary(2, 0, EndReason::Collision));
        m.record(summary(3, 0, EndReason::StepLimit));
        m.record(summary(4, 0, EndReason::Timeout));
        assert_eq!((m.timeouts, m.collisions), (2, 1));
        assert_eq!(m.timeout_pct(), 50.0);
    }

    #[test]
    fn csv_has_header_and_one_row_per_episode() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = TrainingMetrics::new(10);
        m.record(summary(1, 3, EndReason::Collision));
        m.record(summary(2, 1, EndReason::BoardFilled));

        let path = m.export_csv(dir.path(), Some(2)).unwrap();
        assert!(path.ends_with("training_metrics_ep2.csv"));
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "episode,score,avg_score,epsilon,loss,steps,end_reason");
        assert!(lines[2].starts_with("2,1,2.0000,"));
        assert!(lines[2].ends_with(",board_filled"));

        let final_path = m.export_csv(dir.path(), None).unwrap();
        assert!(final_path.ends_with("training_metrics.csv"));
    }
}
