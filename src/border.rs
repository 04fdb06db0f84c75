use crate::utils::Point;

#[derive(Debug, Clone, Copy)]
pub struct Border {
    pub width: i32,
    pub height: i32,
}

impl Border {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_inside(&self, p: Point) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.width && p.y < self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2, self.height / 2)
    }

    /// Every cell, column-major.
    pub fn cells(&self) -> impl Iterator<Item = Point> + '_ {
        (0..self.width).flat_map(move |x| (0..self.height).map(move |y| Point::new(x, y)))
    }

    pub fn area(&self) -> usize {
        (self.width * self.height) as usize
    }
}
