use crate::error::Result;
use crate::metrics::{EndReason, EpisodeSummary};
use rusqlite::{Connection, params};
use std::path::Path;

/// SQLite log of finished episodes, one row per episode, grouped by run.
pub struct EpisodeLog {
    conn: Connection,
    run: String,
}

impl EpisodeLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS episodes (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                run          TEXT NOT NULL,
                episode      INTEGER NOT NULL,
                score        INTEGER NOT NULL,
                steps        INTEGER NOT NULL,
                total_reward REAL NOT NULL,
                mean_loss    REAL NOT NULL,
                epsilon      REAL NOT NULL,
                end_reason   TEXT NOT NULL,
                recorded_at  TEXT NOT NULL
            )",
            [],
        )?;
        let run = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        Ok(Self { conn, run })
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn insert(&self, s: &EpisodeSummary) -> Result<()> {
        self.conn.execute(
            "INSERT INTO episodes
                (run, episode, score, steps, total_reward, mean_loss, epsilon, end_reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.run,
                s.episode as i64,
                s.score as i64,
                s.steps as i64,
                s.total_reward as f64,
                s.mean_loss as f64,
                s.epsilon as f64,
                s.end_reason.as_str(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// best score over every run stored in the file
    pub fn best_score(&self) -> Result<Option<u32>> {
        let best: Option<i64> = self.conn.query_row("SELECT MAX(score) FROM episodes", [], |r| r.get(0))?;
        Ok(best.map(|b| b as u32))
    }

    #[cfg(test)]
    /// Latest `limit` episodes of the current run, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EpisodeSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT episode, score, steps, total_reward, mean_loss, epsilon, end_reason
             FROM episodes WHERE run = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![self.run, limit as i64], |r| {
            let reason: String = r.get(6)?;
            Ok(EpisodeSummary {
                episode: r.get::<_, i64>(0)? as usize,
                score: r.get::<_, i64>(1)? as u32,
                steps: r.get::<_, i64>(2)? as usize,
                total_reward: r.get::<_, f64>(3)? as f32,
                mean_loss: r.get::<_, f64>(4)? as f32,
                epsilon: r.get::<_, f64>(5)? as f32,
                end_reason: EndReason::parse(&reason).unwrap_or(EndReason::Cancelled),
            })
        })?;
        let mut out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        out.reverse();
        Ok(out)
    }
}
