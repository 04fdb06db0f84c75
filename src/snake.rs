use crate::utils::Point;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Heading of the snake. Discriminants follow clockwise order so a right turn is `+1 mod 4`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Direction {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Direction {
    pub fn from_index(i: u8) -> Direction {
        match i % 4 {
            0 => Direction::Up,
            1 => Direction::Right,
            2 => Direction::Down,
            _ => Direction::Left,
        }
    }

    /// 180° turn.
    pub fn opposite(&self) -> Direction {
        Direction::from_index(*self as u8 + 2)
    }

    /// 90° clockwise.
    pub fn right(&self) -> Direction {
        Direction::from_index(*self as u8 + 1)
    }

    /// 90° counter-clockwise.
    pub fn left(&self) -> Direction {
        Direction::from_index(*self as u8 + 3)
    }

    /// Grid offset (dx, dy) of one step; y grows downwards.
    pub fn delta(&self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn step_from(&self, p: Point) -> Point {
        let (dx, dy) = self.delta();
        Point { x: p.x + dx, y: p.y + dy }
    }
}

#[derive(Clone, Debug)]
pub struct Snake {
    body: VecDeque<Point>, // body[0] is the head
    pub direction: Direction,
}

impl Snake {
    pub fn new(head: Point, direction: Direction) -> Snake {
        let mut body = VecDeque::new();
        body.push_back(head);
        Snake { body, direction }
    }

    #[cfg(test)]
    pub fn from_body(body: Vec<Point>, direction: Direction) -> Snake {
        Snake { body: body.into(), direction }
    }

    pub fn head(&self) -> Point {
        self.body[0]
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn body(&self) -> impl Iterator<Item = &Point> {
        self.body.iter()
    }

    pub fn contains(&self, p: Point) -> bool {
        self.body.contains(&p)
    }

    /// True if `p` is one of the cells that stays occupied next step (everything but the tail).
    pub fn blocks(&self, p: Point) -> bool {
        self.body.iter().take(self.body.len() - 1).any(|&c| c == p)
    }

    pub fn push_head(&mut self, p: Point) {
        self.body.push_front(p);
    }

    pub fn pop_tail(&mut self) -> Option<Point> {
        if self.body.len() > 1 { self.body.pop_back() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_are_clockwise_indices() {
        assert_eq!(Direction::Up.right(), Direction::Right);
        assert_eq!(Direction::Left.right(), Direction::Up);
        assert_eq!(Direction::Up.left(), Direction::Left);
        assert_eq!(Direction::Right.left(), Direction::Up);
        assert_eq!(Direction::Down.opposite(), Direction::Up);
    }

    #[test]
    fn blocks_excludes_tail() {
        let mut s = Snake::new(Point::new(2, 0), Direction::Right);
        s.body.push_back(Point::new(1, 0));
        s.body.push_back(Point::new(0, 0));
        assert!(s.blocks(Point::new(2, 0)));
        assert!(s.blocks(Point::new(1, 0)));
        assert!(!s.blocks(Point::new(0, 0)));
    }

    #[test]
    fn single_cell_snake_blocks_nothing() {
        let s = Snake::new(Point::new(4, 4), Direction::Up);
        assert!(!s.blocks(Point::new(4, 4)));
    }
}
