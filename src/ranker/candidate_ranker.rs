use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

// ============================================================================
// Couple (distance, id) ordonné par distance (ordre total sur f64), puis id
// ============================================================================
#[derive(Clone, Debug)]
struct Candidate<I> {
    distance: f64,
    id:       I,
}

impl<I: Ord> PartialEq for Candidate<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I: Ord> Eq for Candidate<I> {}

impl<I: Ord> PartialOrd for Candidate<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<I: Ord> Ord for Candidate<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ============================================================================
// CandidateRanker — tas-min sur la distance déchiffrée
//
// Multiensemble sans capacité fixe : deux insertions identiques donnent deux
// entrées (une personne peut avoir plusieurs embeddings).
// ============================================================================
#[derive(Clone, Debug)]
pub struct CandidateRanker<I: Ord> {
    heap: BinaryHeap<Reverse<Candidate<I>>>,
}

impl<I: Ord> Default for CandidateRanker<I> {
    fn default() -> Self {
        CandidateRanker { heap: BinaryHeap::new() }
    }
}

impl<I: Ord + Clone> CandidateRanker<I> {
    pub fn new() -> Self { Self::default() }

    /// O(log n)
    pub fn insert(&mut self, distance: f64, id: I) {
        self.heap.push(Reverse(Candidate { distance, id }));
    }

    /// Retire et renvoie le couple de plus petite distance
    pub fn pop_min(&mut self) -> Option<(f64, I)> {
        self.heap.pop().map(|Reverse(c)| (c.distance, c.id))
    }

    pub fn peek_min(&self) -> Option<(f64, &I)> {
        self.heap.peek().map(|Reverse(c)| (c.distance, &c.id))
    }

    /// Jusqu'à k couples par distance croissante, sans modifier le tas
    pub fn top_k(&self, k: usize) -> Vec<(f64, I)> {
        let mut sorted: Vec<&Candidate<I>> = self.heap.iter().map(|Reverse(c)| c).collect();
        sorted.sort();
        sorted
            .into_iter()
            .take(k)
            .map(|c| (c.distance, c.id.clone()))
            .collect()
    }

    pub fn len(&self) -> usize { self.heap.len() }

    pub fn is_empty(&self) -> bool { self.heap.is_empty() }
}
