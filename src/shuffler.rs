//! k-let-preserving sequence shuffling (spec.md §4.E').
//!
//! Implements the Altschul-Erikson/uShuffle algorithm: a sequence of length
//! `n` is reinterpreted as a walk over a de Bruijn-style graph whose vertices
//! are `(klet-1)`-mers and whose edges are the `n - klet + 1` overlapping
//! `klet`-mers of the sequence (in original order, so multiplicities match
//! exactly). A uniformly random Eulerian path over that same multigraph,
//! from the same start vertex to the same end vertex, reproduces a shuffled
//! sequence with identical k-let composition. The random spanning
//! in-tree needed to guarantee an Eulerian path exists is built with
//! Wilson's loop-erased random walk algorithm.
//!
//! `klet = 1` is a special case: the de Bruijn graph collapses to a single
//! vertex, so any permutation preserves mono-nucleotide composition and a
//! plain Fisher-Yates shuffle is used directly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// A per-pass k-let-preserving shuffler. Holds its own RNG handle (spec.md
/// §9 explicitly rejects the C implementation's process-global `srand(1)`;
/// each pass gets its own [`StdRng`] instead).
pub struct Shuffler {
    rng: StdRng,
}

impl Shuffler {
    /// Builds a shuffler seeded for one counting pass. Counter calls this
    /// with seed `1` at pass entry (spec.md §4.E, "shuffle counting") so the
    /// shuffled corpus is reproducible for a fixed input.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Resets this shuffler's RNG to `seed`, matching the teacher corpus's
    /// per-pass-reset convention described in spec.md §4.E'.
    pub fn reset(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Returns a k-let-preserving shuffle of `seq`. `klet` is the unit of
    /// preserved composition (spec.md `prob_ntprec`). Sequences shorter than
    /// `klet` are returned unchanged (no edges to shuffle).
    #[must_use]
    pub fn shuffle(&mut self, seq: &[u8], klet: usize) -> Vec<u8> {
        if klet <= 1 || seq.len() <= klet {
            return self.fisher_yates(seq);
        }
        self.euler_shuffle(seq, klet)
    }

    fn fisher_yates(&mut self, seq: &[u8]) -> Vec<u8> {
        let mut out = seq.to_vec();
        for i in (1..out.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            out.swap(i, j);
        }
        out
    }

    fn euler_shuffle(&mut self, seq: &[u8], klet: usize) -> Vec<u8> {
        let vertex_len = klet - 1;
        let num_edges = seq.len() - klet + 1;

        // Assign stable vertex ids to every overlapping (klet-1)-mer,
        // including the sentinel final vertex (one past the last edge).
        let mut vertex_id: HashMap<&[u8], usize> = HashMap::new();
        let mut vertex_bytes: Vec<&[u8]> = Vec::new();

        let mut from_ids = Vec::with_capacity(num_edges);
        let mut to_ids = Vec::with_capacity(num_edges);
        for i in 0..num_edges {
            let from = vertex_id_of(&seq[i..i + vertex_len], &mut vertex_id, &mut vertex_bytes);
            let to = vertex_id_of(&seq[i + 1..i + 1 + vertex_len], &mut vertex_id, &mut vertex_bytes);
            from_ids.push(from);
            to_ids.push(to);
        }

        let num_vertices = vertex_bytes.len();
        let start_vertex = from_ids[0];
        let root = to_ids[num_edges - 1];

        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); num_vertices];
        for e in 0..num_edges {
            out_edges[from_ids[e]].push(e);
        }

        let reserved = self.random_spanning_in_tree(&out_edges, &to_ids, root, num_vertices);

        // Per-vertex traversal order: a random permutation of its out-edges,
        // with the reserved "last" edge (if any) moved to the end so the
        // walk never strands itself before exhausting every other vertex.
        let mut order: Vec<Vec<usize>> = Vec::with_capacity(num_vertices);
        for v in 0..num_vertices {
            let mut edges = out_edges[v].clone();
            for i in (1..edges.len()).rev() {
                let j = self.rng.gen_range(0..=i);
                edges.swap(i, j);
            }
            if let Some(r) = reserved.get(&v).copied() {
                if let Some(pos) = edges.iter().position(|&e| e == r) {
                    edges.swap_remove(pos);
                    edges.push(r);
                }
            }
            order.push(edges);
        }

        let circuit = hierholzer(start_vertex, &order, &to_ids, num_vertices);

        // Reconstruct the byte sequence: the first vertex's full bytes, then
        // the last byte of every subsequent vertex on the path.
        let mut result = Vec::with_capacity(seq.len());
        result.extend_from_slice(vertex_bytes[circuit[0]]);
        for &v in &circuit[1..] {
            if let Some(&last) = vertex_bytes[v].last() {
                result.push(last);
            }
        }
        result
    }

    /// Wilson's loop-erased random walk algorithm: builds a random spanning
    /// in-tree of the out-edge graph, rooted at `root`, so every non-root
    /// vertex with outgoing edges gets exactly one edge reserved as "must be
    /// used last when leaving this vertex" — the standard construction that
    /// guarantees the resulting random walk is a genuine Eulerian path.
    fn random_spanning_in_tree(
        &mut self,
        out_edges: &[Vec<usize>],
        to_ids: &[usize],
        root: usize,
        num_vertices: usize,
    ) -> HashMap<usize, usize> {
        let mut reserved = HashMap::new();
        let mut in_tree = vec![false; num_vertices];
        in_tree[root] = true;

        for start in 0..num_vertices {
            if in_tree[start] || out_edges[start].is_empty() {
                continue;
            }
            let mut path_vertices = vec![start];
            let mut path_edges: Vec<usize> = Vec::new();
            let mut cur = start;
            while !in_tree[cur] {
                let choices = &out_edges[cur];
                let e = choices[self.rng.gen_range(0..choices.len())];
                let next = to_ids[e];
                if let Some(pos) = path_vertices.iter().position(|&v| v == next) {
                    path_vertices.truncate(pos + 1);
                    path_edges.truncate(pos);
                } else {
                    path_vertices.push(next);
                    path_edges.push(e);
                }
                cur = next;
            }
            for (i, &e) in path_edges.iter().enumerate() {
                reserved.insert(path_vertices[i], e);
                in_tree[path_vertices[i]] = true;
            }
        }
        reserved
    }
}

/// Returns the stable id for `slice`, assigning a fresh one on first sight.
fn vertex_id_of<'a>(
    slice: &'a [u8],
    ids: &mut HashMap<&'a [u8], usize>,
    bytes: &mut Vec<&'a [u8]>,
) -> usize {
    if let Some(&id) = ids.get(slice) {
        id
    } else {
        let id = bytes.len();
        bytes.push(slice);
        ids.insert(slice, id);
        id
    }
}

/// Iterative Hierholzer's algorithm producing the vertex sequence of an
/// Eulerian path starting at `start`, consuming each vertex's out-edges in
/// the precomputed `order`.
fn hierholzer(start: usize, order: &[Vec<usize>], to_ids: &[usize], num_vertices: usize) -> Vec<usize> {
    let mut ptr = vec![0usize; num_vertices];
    let mut stack = vec![start];
    let mut circuit = Vec::new();
    while let Some(&v) = stack.last() {
        if ptr[v] < order[v].len() {
            let e = order[v][ptr[v]];
            ptr[v] += 1;
            stack.push(to_ids[e]);
        } else {
            circuit.push(stack.pop().unwrap_or(v));
        }
    }
    circuit.reverse();
    circuit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn klet_counts(seq: &[u8], klet: usize) -> HashMap<Vec<u8>, usize> {
        let mut counts = HashMap::new();
        if seq.len() < klet {
            return counts;
        }
        for i in 0..=seq.len() - klet {
            *counts.entry(seq[i..i + klet].to_vec()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn shuffle_preserves_length() {
        let mut s = Shuffler::new(1);
        let seq = b"ACGTACGTACGTACGT";
        let shuffled = s.shuffle(seq, 3);
        assert_eq!(shuffled.len(), seq.len());
    }

    #[test]
    fn shuffle_preserves_klet_composition() {
        let mut s = Shuffler::new(7);
        let seq = b"ACGTACGTACGTGGCTATAG";
        for klet in [1usize, 2, 3, 4] {
            let shuffled = s.shuffle(seq, klet);
            assert_eq!(
                klet_counts(seq, klet),
                klet_counts(&shuffled, klet),
                "klet={klet}"
            );
        }
    }

    #[test]
    fn shuffle_preserves_start_and_end_for_klet_gt_1() {
        let mut s = Shuffler::new(3);
        let seq = b"ACGTACGTACGTGGCTATAG";
        let klet = 3;
        let shuffled = s.shuffle(seq, klet);
        assert_eq!(&shuffled[..klet - 1], &seq[..klet - 1]);
        assert_eq!(&shuffled[shuffled.len() - (klet - 1)..], &seq[seq.len() - (klet - 1)..]);
    }

    #[test]
    fn short_sequence_returned_unchanged_length() {
        let mut s = Shuffler::new(1);
        let seq = b"AC";
        let shuffled = s.shuffle(seq, 5);
        assert_eq!(shuffled.len(), seq.len());
    }

    #[test]
    fn reset_reproduces_same_shuffle() {
        let mut s = Shuffler::new(1);
        let seq = b"ACGTACGTACGTGGCTATAGACGT";
        let first = s.shuffle(seq, 3);
        s.reset(1);
        let second = s.shuffle(seq, 3);
        assert_eq!(first, second);
    }
}
