use crate::error::{Result, SnakeError};
use crate::game_input::FeatureVector;
use rand::Rng;
use rand::seq::index;
use std::collections::VecDeque;

/// A single experience tuple (s, a, r, s', done).
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: FeatureVector,
    pub action: usize,
    pub reward: f32,
    pub next_state: FeatureVector,
    pub done: bool,
}

/// Fixed-capacity FIFO of transitions; the oldest entry is evicted once full.
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// are there at least `batch_size` transitions
    pub fn is_ready(&self, batch_size: usize) -> bool {
        self.buffer.len() >= batch_size
    }

    /// `batch_size` distinct transitions drawn uniformly without replacement.
    pub fn sample<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<&Transition>> {
        if !self.is_ready(batch_size) {
            return Err(SnakeError::InsufficientSamples {
                requested: batch_size,
                available: self.buffer.len(),
            });
        }
        Ok(index::sample(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect())
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn transition(i: usize) -> Transition {
        let mut state = [0.0; 11];
        state[0] = i as f32;
        Transition { state, action: i % 3, reward: i as f32, next_state: state, done: false }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = ReplayBuffer::new(3);
        for i in 0..4 {
            buf.push(transition(i));
        }
        assert_eq!(buf.len(), 3);
        let rewards: Vec<f32> = buf.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buf = ReplayBuffer::new(10);
        for i in 0..1000 {
            buf.push(transition(i));
            assert!(buf.len() <= buf.capacity());
        }
    }

    #[test]
    fn sample_requires_enough_transitions() {
        let mut buf = ReplayBuffer::new(10);
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..4 {
            buf.push(transition(i));
        }
        match buf.sample(5, &mut rng) {
            Err(SnakeError::InsufficientSamples { requested, available }) => {
                assert_eq!((requested, available), (5, 4));
            }
            other => panic!("unexpected {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn sample_is_without_replacement() {
        let mut buf = ReplayBuffer::new(20);
        let mut rng = StdRng::seed_from_u64(9);
        for i in 0..8 {
            buf.push(transition(i));
        }
        for _ in 0..20 {
            let batch = buf.sample(8, &mut rng).unwrap();
            let mut seen: Vec<f32> = batch.iter().map(|t| t.reward).collect();
            seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(seen, (0..8).map(|i| i as f32).collect::<Vec<_>>());
        }
    }
}
