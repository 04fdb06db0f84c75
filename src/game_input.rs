use crate::game::Game;
use crate::snake::Direction;

pub const STATE_SIZE: usize = 11;

/// Encoded observation fed to the agent; every entry is 0.0 or 1.0.
pub type FeatureVector = [f32; STATE_SIZE];

/// Indices of the food-direction bits.
pub const FOOD_LEFT: usize = 7;
pub const FOOD_RIGHT: usize = 8;
pub const FOOD_UP: usize = 9;
pub const FOOD_DOWN: usize = 10;

pub struct GameInput;

impl GameInput {
    /// Layout:
    /// `[danger straight, danger right, danger left,
    ///   dir left, dir right, dir up, dir down,
    ///   food left, food right, food up, food down]`
    pub fn from_game(game: &Game) -> FeatureVector {
        let mut input = [0.0f32; STATE_SIZE];
        let head = game.snake().head();
        let dir = game.direction();

        // danger one step ahead, relative to the heading
        let relative = [dir, dir.right(), dir.left()];
        for (i, d) in relative.iter().enumerate() {
            input[i] = flag(game.is_collision(d.step_from(head)));
        }

        input[3] = flag(dir == Direction::Left);
        input[4] = flag(dir == Direction::Right);
        input[5] = flag(dir == Direction::Up);
        input[6] = flag(dir == Direction::Down);

        if let Some(food) = game.food() {
            input[FOOD_LEFT] = flag(food.x < head.x);
            input[FOOD_RIGHT] = flag(food.x > head.x);
            input[FOOD_UP] = flag(food.y < head.y);
            input[FOOD_DOWN] = flag(food.y > head.y);
        }

        input
    }
}

fn flag(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;
    use crate::utils::Point;

    fn game() -> Game {
        Game::new(&EnvConfig { grid_width: 10, grid_height: 10, max_steps_without_food: 100, seed: Some(0) })
    }

    #[test]
    fn open_board_heading_right() {
        let mut g = game();
        g.set_layout(vec![Point::new(5, 5)], Direction::Right, Some(Point::new(7, 2)));
        let s = GameInput::from_game(&g);
        assert_eq!(s, [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn danger_is_relative_to_heading() {
        let mut g = game();
        // top-left corner heading up: straight (0,-1) and left (-1,0) are walls, right (1,0) is free
        g.set_layout(vec![Point::new(0, 0)], Direction::Up, Some(Point::new(0, 5)));
        let s = GameInput::from_game(&g);
        assert_eq!(&s[0..3], &[1.0, 0.0, 1.0]);
        assert_eq!(&s[3..7], &[0.0, 0.0, 1.0, 0.0]);
        assert_eq!(&s[7..11], &[0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn body_counts_as_danger_but_tail_does_not() {
        let mut g = game();
        // head (5,5) heading down; (6,5) is body, (4,5) is the tail
        let body = vec![
            Point::new(5, 5),
            Point::new(6, 5),
            Point::new(6, 4),
            Point::new(5, 4),
            Point::new(4, 4),
            Point::new(4, 5),
        ];
        g.set_layout(body, Direction::Down, Some(Point::new(5, 9)));
        let s = GameInput::from_game(&g);
        // straight (5,6) free, right of down is left on screen (4,5) tail, left of down is (6,5) body
        assert_eq!(&s[0..3], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn food_on_same_column_sets_single_bit() {
        let mut g = game();
        g.set_layout(vec![Point::new(5, 5)], Direction::Right, Some(Point::new(5, 8)));
        let s = GameInput::from_game(&g);
        assert_eq!(&s[7..11], &[0.0, 0.0, 0.0, 1.0]);
    }
}
