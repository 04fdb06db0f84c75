use crate::border::Border;
use crate::snake::Snake;
use crate::utils::Point;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Cells that are neither snake nor food, with O(1) insert/remove and uniform choice.
#[derive(Debug, Clone, Default)]
pub struct EmptyCells {
    cells: Vec<Point>,
    index: HashMap<Point, usize>,
}

impl EmptyCells {
    /// All board cells minus the snake.
    pub fn rebuild(border: &Border, snake: &Snake) -> Self {
        let mut empty = Self::default();
        for p in border.cells() {
            if !snake.contains(p) {
                empty.insert(p);
            }
        }
        empty
    }

    pub fn insert(&mut self, p: Point) -> bool {
        if self.index.contains_key(&p) {
            return false;
        }
        self.index.insert(p, self.cells.len());
        self.cells.push(p);
        true
    }

    pub fn remove(&mut self, p: Point) -> bool {
        let Some(i) = self.index.remove(&p) else {
            return false;
        };
        let last = self.cells.len() - 1;
        self.cells.swap_remove(i);
        if i != last {
            let moved = self.cells[i];
            self.index.insert(moved, i);
        }
        true
    }

    #[cfg(test)]
    pub fn contains(&self, p: Point) -> bool {
        self.index.contains_key(&p)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.cells.iter()
    }
}

/// Picks the next food cell and takes it out of `empty`.
///
/// While the snake is short (length <= 3) the choice is limited to cells within
/// Manhattan distance `5 + 2 * len` of the head, falling back to the whole board
/// when none qualify. Returns `None` once the board is full.
pub fn respawn<R: Rng>(empty: &mut EmptyCells, snake: &Snake, rng: &mut R) -> Option<Point> {
    if empty.is_empty() {
        return None;
    }

    let mut pick = None;
    if snake.len() <= 3 {
        let head = snake.head();
        let range_limit = 5 + 2 * snake.len() as i32;
        let close: Vec<Point> = empty
            .iter()
            .copied()
            .filter(|c| c.manhattan(head) <= range_limit)
            .collect();
        pick = close.choose(rng).copied();
    }

    let food = match pick {
        Some(p) => p,
        None => empty.cells[rng.gen_range(0..empty.len())],
    };
    empty.remove(food);
    Some(food)
}
