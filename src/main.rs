mod border;
mod checkpoint;
mod config;
mod control;
mod db;
mod dqn;
mod error;
mod event_loop;
mod food;
mod game;
mod game_input;
mod log;
mod metrics;
mod network;
mod replay_buffer;
mod snake;
mod train;
mod utils;
mod web;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use config::{AgentConfig, EnvConfig, TrainerConfig};
use control::SharedState;
use dqn::DqnAgent;
use event_loop::Controller;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use train::Trainer;

#[derive(Parser)]
#[command(name = "snake_dqn")]
#[command(version, about = "Snake environment with a DQN agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log file (appended), in addition to the console
    #[arg(long, global = true, default_value = "train.log")]
    log_file: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Headless training
    Train(TrainArgs),
    /// Training with a live web dashboard
    Visual {
        #[command(flatten)]
        train: TrainArgs,
        /// Dashboard port
        #[arg(long, default_value_t = 3000, env = "SNAKE_GAME_WEB_PORT")]
        port: u16,
        /// Keep the dashboard up this many seconds after training
        #[arg(long, default_value_t = 60)]
        linger: u64,
    },
    /// Play in a window, yourself or with a trained agent
    Play {
        /// Let the agent from --model play
        #[arg(long)]
        agent: bool,
        #[arg(long, default_value = "models/snake_dqn.json")]
        model: PathBuf,
        #[command(flatten)]
        grid: GridArgs,
    },
    /// Greedy evaluation of a saved model
    Evaluate {
        #[arg(long, default_value_t = 10)]
        episodes: usize,
        #[arg(long, default_value_t = 2000)]
        max_steps: usize,
        #[arg(long, default_value = "models/snake_dqn.json")]
        model: PathBuf,
        #[command(flatten)]
        grid: GridArgs,
    },
}

#[derive(Args, Clone)]
struct GridArgs {
    #[arg(long, default_value_t = 40)]
    grid_width: i32,
    #[arg(long, default_value_t = 30)]
    grid_height: i32,
    /// Seed for environment and agent randomness
    #[arg(long)]
    seed: Option<u64>,
}

impl GridArgs {
    /// Board settings for `play` and `evaluate`, rejected before any window or agent is built.
    fn env(&self) -> Result<EnvConfig> {
        let env = EnvConfig { grid_width: self.grid_width, grid_height: self.grid_height, seed: self.seed, ..Default::default() };
        env.validate()?;
        Ok(env)
    }
}

/// Unset options fall back to the defaults of the chosen mode.
#[derive(Args, Clone)]
struct TrainArgs {
    #[arg(long)]
    episodes: Option<usize>,
    #[arg(long)]
    max_steps: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Learn calls between target network syncs
    #[arg(long)]
    target_update_freq: Option<u64>,
    #[arg(long)]
    save_freq: Option<usize>,
    #[arg(long)]
    render_freq: Option<usize>,
    /// Timeout multiplier for steps without food
    #[arg(long)]
    timeout: Option<usize>,
    #[arg(long)]
    model: Option<PathBuf>,
    /// Continue from an existing model if there is one (default)
    #[arg(long = "continue")]
    resume: bool,
    /// Ignore any existing model
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// SQLite episode log
    #[arg(long)]
    db: Option<PathBuf>,
    #[command(flatten)]
    grid: GridArgs,
}

struct ModeDefaults {
    episodes: usize,
    max_steps: usize,
    timeout: usize,
    render_freq: usize,
    model: &'static str,
}

const HEADLESS: ModeDefaults =
    ModeDefaults { episodes: 1000, max_steps: 2000, timeout: 100, render_freq: 0, model: "models/snake_dqn.json" };
const VISUAL: ModeDefaults =
    ModeDefaults { episodes: 100, max_steps: 500, timeout: 80, render_freq: 1, model: "models/visual_model.json" };

impl TrainArgs {
    fn configs(&self, d: &ModeDefaults) -> (TrainerConfig, EnvConfig, AgentConfig) {
        let episodes = self.episodes.unwrap_or(d.episodes);
        let env = EnvConfig {
            grid_width: self.grid.grid_width,
            grid_height: self.grid.grid_height,
            max_steps_without_food: self.timeout.unwrap_or(d.timeout),
            seed: self.grid.seed,
        };
        let mut agent = AgentConfig { seed: self.grid.seed.map(|s| s.wrapping_add(1)), ..Default::default() };
        if let Some(batch) = self.batch_size {
            agent.batch_size = batch;
        }
        if let Some(freq) = self.target_update_freq {
            agent.update_target_freq = freq;
        }
        let defaults = TrainerConfig::default();
        let trainer = TrainerConfig {
            episodes,
            max_steps: self.max_steps.unwrap_or(d.max_steps),
            save_freq: self.save_freq.unwrap_or(if d.render_freq > 0 { (episodes / 10).max(5) } else { defaults.save_freq }),
            render_freq: self.render_freq.unwrap_or(d.render_freq),
            model_path: self.model.clone().unwrap_or_else(|| PathBuf::from(d.model)),
            log_dir: self.log_dir.clone().unwrap_or(defaults.log_dir),
            db_path: self.db.clone(),
            continue_training: self.resume || !self.fresh,
            ..defaults
        };
        (trainer, env, agent)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init(&cli.log_file).context("could not set up logging")?;

    match cli.command {
        Command::Train(args) => {
            let (tc, ec, ac) = args.configs(&HEADLESS);
            let mut trainer = Trainer::new(tc, ec, ac)?;
            trainer.train()?;
        }
        Command::Visual { train, port, linger } => visual(&train, port, linger)?,
        Command::Play { agent, model, grid } => {
            let env = grid.env()?;
            let controller = if agent {
                Controller::Agent(Box::new(load_agent(&model, grid.seed)?))
            } else {
                Controller::Human
            };
            event_loop::run(env, controller)?;
        }
        Command::Evaluate { episodes, max_steps, model, grid } => {
            let env = grid.env()?;
            let agent = load_agent(&model, grid.seed)?;
            let report = train::evaluate(&agent, &env, episodes, max_steps)?;
            info!("scores {:?}, average {:.2}", report.scores, report.average);
        }
    }
    Ok(())
}

fn visual(args: &TrainArgs, port: u16, linger: u64) -> Result<()> {
    let (tc, ec, ac) = args.configs(&VISUAL);
    let shared = Arc::new(SharedState::new());
    let runtime = tokio::runtime::Runtime::new().context("could not start tokio runtime")?;
    let addr = runtime.block_on(web::start(shared.clone(), port, web::BindPolicy::default()))?;
    info!("web interface available at http://{}", addr);

    let mut trainer = Trainer::new(tc, ec, ac)?;
    trainer.attach(shared.clone());
    shared.log("Starting visual training...");
    let handle = thread::Builder::new()
        .name("training".into())
        .spawn(move || trainer.train())
        .context("could not spawn training thread")?;
    let outcome = handle.join().map_err(|_| anyhow!("training thread panicked"))?;
    if let Err(e) = &outcome {
        warn!("training ended with an error: {}", e);
        shared.log(format!("Training failed: {}", e));
    } else {
        shared.log("Training complete");
    }

    info!("dashboard stays up for {}s at http://{}", linger, addr);
    runtime.block_on(tokio::time::sleep(Duration::from_secs(linger)));
    outcome.map_err(Into::into)
}

/// Agent with the weights from `model`, or an untrained one when that fails.
fn load_agent(model: &Path, seed: Option<u64>) -> Result<DqnAgent> {
    let mut agent = DqnAgent::new(AgentConfig { seed, ..Default::default() })?;
    if checkpoint::try_resume(&mut agent, model).is_none() {
        warn!("using an untrained agent");
    }
    Ok(agent)
}
