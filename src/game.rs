use crate::border::Border;
use crate::config::EnvConfig;
use crate::food::{self, EmptyCells};
use crate::game_input::{FeatureVector, GameInput};
use crate::snake::{Direction, Snake};
use crate::utils::Point;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub const FOOD_REWARD: f32 = 1.0;
pub const STEP_PENALTY: f32 = -0.01;
pub const DEATH_PENALTY: f32 = -1.0;
pub const DISTANCE_SHAPING: f32 = 0.1;

/// Relative turn chosen by the agent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Straight = 0,
    TurnRight = 1,
    TurnLeft = 2,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Straight, Action::TurnRight, Action::TurnLeft];

    pub fn from_index(i: usize) -> Option<Action> {
        Self::ALL.get(i).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn apply(self, d: Direction) -> Direction {
        match self {
            Action::Straight => d,
            Action::TurnRight => d.right(),
            Action::TurnLeft => d.left(),
        }
    }
}

/// Side information of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepInfo {
    pub score: u32,
    pub timeout: bool,
    pub collision: bool,
    pub ate_food: bool,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub state: FeatureVector,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

/// Read-only view handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub width: i32,
    pub height: i32,
    pub snake: Vec<Point>,
    pub food: Option<Point>,
    pub direction: Direction,
    pub score: u32,
    pub game_over: bool,
}

/// The grid environment: snake, food and the transition/reward rules.
pub struct Game {
    border: Border,
    max_steps_without_food: usize,
    snake: Snake,
    food: Option<Point>,
    empty: EmptyCells,
    score: u32,
    steps_since_food: usize,
    total_steps: u64,
    game_over: bool,
    rng: StdRng,
}

impl Game {
    pub fn new(cfg: &EnvConfig) -> Self {
        let border = Border::new(cfg.grid_width, cfg.grid_height);
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut game = Self {
            border,
            max_steps_without_food: cfg.max_steps_without_food,
            snake: Snake::new(border.center(), Direction::Right),
            food: None,
            empty: EmptyCells::default(),
            score: 0,
            steps_since_food: 0,
            total_steps: 0,
            game_over: false,
            rng,
        };
        game.reset();
        game
    }

    /// Starts a new episode with a one-cell snake in the centre heading right.
    pub fn reset(&mut self) -> FeatureVector {
        self.snake = Snake::new(self.border.center(), Direction::Right);
        self.score = 0;
        self.steps_since_food = 0;
        self.total_steps = 0;
        self.game_over = false;
        self.empty = EmptyCells::rebuild(&self.border, &self.snake);
        self.place_food();
        self.state()
    }

    fn place_food(&mut self) {
        self.food = food::respawn(&mut self.empty, &self.snake, &mut self.rng);
        if self.food.is_none() {
            // board filled
            self.game_over = true;
        }
    }

    /// Wall or any body cell except the tail, which vacates this step.
    pub fn is_collision(&self, p: Point) -> bool {
        !self.border.is_inside(p) || self.snake.blocks(p)
    }

    /// Advances one step. `None` keeps the current heading (human control path).
    pub fn step(&mut self, action: Option<Action>) -> StepResult {
        if self.game_over {
            return self.result(0.0, StepInfo { score: self.score, ..Default::default() });
        }

        if let Some(action) = action {
            self.snake.direction = action.apply(self.snake.direction);
        }

        let new_head = self.snake.direction.step_from(self.snake.head());
        if self.is_collision(new_head) {
            self.game_over = true;
            return self.result(DEATH_PENALTY, StepInfo { score: self.score, collision: true, ..Default::default() });
        }

        self.empty.remove(new_head);
        self.snake.push_head(new_head);

        let mut reward;
        let ate_food = self.food == Some(new_head);
        if ate_food {
            self.score += 1;
            reward = FOOD_REWARD;
            // the tail stays, so `empty` already excludes every body cell
            debug_assert_eq!(self.empty.len() + self.snake.len(), self.border.area());
            self.place_food();
            self.steps_since_food = 0;
        } else {
            if let Some(tail) = self.snake.pop_tail() {
                if tail != new_head {
                    self.empty.insert(tail);
                }
            }
            reward = STEP_PENALTY;
            self.steps_since_food += 1;

            if self.steps_since_food > self.max_steps_without_food * self.snake.len() {
                self.game_over = true;
                return self.result(DEATH_PENALTY, StepInfo { score: self.score, timeout: true, ..Default::default() });
            }

            if let Some(food) = self.food {
                let distance = new_head.manhattan(food);
                if distance > 0 {
                    reward += DISTANCE_SHAPING / distance as f32;
                }
            }
        }

        self.total_steps += 1;
        self.result(reward, StepInfo { score: self.score, ate_food, ..Default::default() })
    }

    fn result(&self, reward: f32, info: StepInfo) -> StepResult {
        StepResult { state: self.state(), reward, done: self.game_over, info }
    }

    /// Human control: requests an absolute heading. A direct reversal is rejected.
    pub fn set_direction(&mut self, dir: Direction) -> bool {
        if dir == self.snake.direction.opposite() {
            return false;
        }
        self.snake.direction = dir;
        true
    }

    /// Ends the episode from outside, e.g. when the driving policy failed.
    pub fn force_game_over(&mut self) {
        self.game_over = true;
    }

    pub fn state(&self) -> FeatureVector {
        GameInput::from_game(self)
    }

    pub fn snapshot(&self) -> GameView {
        GameView {
            width: self.border.width,
            height: self.border.height,
            snake: self.snake.body().copied().collect(),
            food: self.food,
            direction: self.snake.direction,
            score: self.score,
            game_over: self.game_over,
        }
    }

    pub fn snake(&self) -> &Snake {
        &self.snake
    }

    pub fn food(&self) -> Option<Point> {
        self.food
    }

    pub fn direction(&self) -> Direction {
        self.snake.direction
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn game_over(&self) -> bool {
        self.game_over
    }

    #[cfg(test)]
    pub fn steps_since_food(&self) -> usize {
        self.steps_since_food
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    #[cfg(test)]
    pub fn width(&self) -> i32 {
        self.border.width
    }

    #[cfg(test)]
    pub fn height(&self) -> i32 {
        self.border.height
    }

    #[cfg(test)]
    pub fn empty_cells(&self) -> &EmptyCells {
        &self.empty
    }

    /// Replaces snake and food, keeping `empty` consistent.
    #[cfg(test)]
    pub(crate) fn set_layout(&mut self, body: Vec<Point>, direction: Direction, food: Option<Point>) {
        self.snake = Snake::from_body(body, direction);
        self.empty = EmptyCells::rebuild(&self.border, &self.snake);
        if let Some(f) = food {
            self.empty.remove(f);
        }
        self.food = food;
        self.game_over = false;
        self.steps_since_food = 0;
    }
}
