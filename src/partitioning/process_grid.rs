//! Logical process grids and neighbour directions.
//!
//! A [`ProcessGrid`] is the Cartesian-communicator view of a world: ranks are
//! laid out row-major (dimension 0 slowest) over `dims`, optionally periodic.
//! The neighbour of a rank in a [`Direction`] is a closed-form expression of
//! its grid coordinates, so every rank can compute every other rank's
//! neighbours without communication.

use std::fmt;

use crate::partitioning::error::PartitionError;

/// Offset in `{-1, 0, 1}^D`, never all zero.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Direction<const D: usize> {
    off: [i8; D],
}

impl Direction<2> {
    pub const NORTH: Self = Direction { off: [0, -1] };
    pub const SOUTH: Self = Direction { off: [0, 1] };
    pub const WEST: Self = Direction { off: [-1, 0] };
    pub const EAST: Self = Direction { off: [1, 0] };
    pub const NORTH_WEST: Self = Direction { off: [-1, -1] };
    pub const NORTH_EAST: Self = Direction { off: [1, -1] };
    pub const SOUTH_WEST: Self = Direction { off: [-1, 1] };
    pub const SOUTH_EAST: Self = Direction { off: [1, 1] };
}

impl<const D: usize> Direction<D> {
    /// `None` for the zero offset or components outside `{-1, 0, 1}`.
    pub fn new(off: [i8; D]) -> Option<Self> {
        let valid = off.iter().all(|o| (-1..=1).contains(o)) && off.iter().any(|&o| o != 0);
        valid.then_some(Direction { off })
    }

    /// Number of directions, `3^D - 1`.
    pub const fn count() -> usize {
        3usize.pow(D as u32) - 1
    }

    /// All directions in [`index`](Self::index) order.
    pub fn all() -> Vec<Self> {
        (0..Self::count()).map(Self::from_index).collect()
    }

    /// The face directions (one non-zero component), in index order.
    pub fn faces() -> impl Iterator<Item = Self> {
        Self::all().into_iter().filter(Self::is_face)
    }

    /// Dense index in `0..count()`: base-3 digits of `off + 1`, dimension 0
    /// most significant, with the centre removed.
    pub fn index(&self) -> usize {
        let raw = self
            .off
            .iter()
            .fold(0usize, |acc, &o| acc * 3 + (o + 1) as usize);
        let center = Self::count() / 2;
        if raw > center { raw - 1 } else { raw }
    }

    pub fn from_index(idx: usize) -> Self {
        let center = Self::count() / 2;
        let mut raw = if idx >= center { idx + 1 } else { idx };
        let mut off = [0i8; D];
        for d in (0..D).rev() {
            off[d] = (raw % 3) as i8 - 1;
            raw /= 3;
        }
        Direction { off }
    }

    pub fn opposite(&self) -> Self {
        let mut off = self.off;
        for o in &mut off {
            *o = -*o;
        }
        Direction { off }
    }

    pub fn is_face(&self) -> bool {
        self.off.iter().filter(|&&o| o != 0).count() == 1
    }

    pub fn component(&self, d: usize) -> i8 {
        self.off[d]
    }

    pub fn offset(&self) -> [i64; D] {
        self.off.map(i64::from)
    }
}

impl<const D: usize> fmt::Debug for Direction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Direction{:?}", self.off)
    }
}

/// Balanced factorization of `procs` into `D` factors, largest first, in the
/// manner of `MPI_Dims_create`.
pub fn create_dims<const D: usize>(procs: usize) -> Result<[usize; D], PartitionError> {
    if procs == 0 {
        return Err(PartitionError::InvalidProcessCount {
            procs,
            reason: "at least one process is required".into(),
        });
    }
    let mut primes = Vec::new();
    let mut n = procs;
    let mut f = 2;
    while f * f <= n {
        while n % f == 0 {
            primes.push(f);
            n /= f;
        }
        f += 1;
    }
    if n > 1 {
        primes.push(n);
    }
    let mut dims = [1usize; D];
    for &p in primes.iter().rev() {
        if let Some(slot) = dims.iter_mut().min_by_key(|v| **v) {
            *slot *= p;
        }
    }
    dims.sort_unstable_by(|a, b| b.cmp(a));
    Ok(dims)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessGrid<const D: usize> {
    dims: [usize; D],
    periodic: bool,
}

impl<const D: usize> ProcessGrid<D> {
    pub fn new(dims: [usize; D], periodic: bool) -> Self {
        ProcessGrid { dims, periodic }
    }

    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn num_procs(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn coords(&self, rank: usize) -> [usize; D] {
        let mut c = [0; D];
        let mut r = rank;
        for d in (0..D).rev() {
            c[d] = r % self.dims[d];
            r /= self.dims[d];
        }
        c
    }

    pub fn rank_of(&self, coords: [usize; D]) -> usize {
        coords
            .iter()
            .zip(self.dims.iter())
            .fold(0, |acc, (&c, &n)| acc * n + c)
    }

    /// `rank = rowmajor((coords + off) mod dims)` on a periodic grid; `None`
    /// past a non-periodic boundary.
    pub fn neighbor(&self, rank: usize, dir: Direction<D>) -> Option<usize> {
        let c = self.coords(rank);
        let mut n = [0usize; D];
        for d in 0..D {
            let dim = self.dims[d] as i64;
            let v = c[d] as i64 + i64::from(dir.component(d));
            n[d] = if self.periodic {
                v.rem_euclid(dim) as usize
            } else if (0..dim).contains(&v) {
                v as usize
            } else {
                return None;
            };
        }
        Some(self.rank_of(n))
    }

    /// `(direction, neighbour)` pairs for `rank`, in direction order.
    pub fn neighbors(&self, rank: usize) -> Vec<(Direction<D>, usize)> {
        Direction::all()
            .into_iter()
            .filter_map(|dir| self.neighbor(rank, dir).map(|r| (dir, r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_index_roundtrip_and_order() {
        let all = Direction::<2>::all();
        assert_eq!(all.len(), 8);
        for (i, d) in all.iter().enumerate() {
            assert_eq!(d.index(), i);
            assert_eq!(d.opposite().opposite(), *d);
        }
        assert_eq!(Direction::<3>::all().len(), 26);
        assert_eq!(Direction::<2>::faces().count(), 4);
        assert_eq!(Direction::<3>::faces().count(), 6);
        assert!(Direction::<2>::new([0, 0]).is_none());
    }

    #[test]
    fn dims_are_balanced() {
        assert_eq!(create_dims::<2>(4).unwrap(), [2, 2]);
        assert_eq!(create_dims::<2>(6).unwrap(), [3, 2]);
        assert_eq!(create_dims::<2>(12).unwrap(), [4, 3]);
        assert_eq!(create_dims::<3>(8).unwrap(), [2, 2, 2]);
        assert_eq!(create_dims::<2>(7).unwrap(), [7, 1]);
        assert!(create_dims::<2>(0).is_err());
    }

    #[test]
    fn periodic_two_by_two() {
        let g = ProcessGrid::new([2, 2], true);
        // rank 0 = (0,0); its north (0,-1) wraps to (0,1) = rank 1
        assert_eq!(g.neighbor(0, Direction::NORTH), Some(1));
        assert_eq!(g.neighbor(0, Direction::SOUTH), Some(1));
        assert_eq!(g.neighbor(0, Direction::EAST), Some(2));
        assert_eq!(g.neighbor(0, Direction::SOUTH_EAST), Some(3));
    }

    #[test]
    fn bounded_edges_have_no_neighbor() {
        let g = ProcessGrid::new([3, 3], false);
        assert_eq!(g.neighbor(0, Direction::WEST), None);
        assert_eq!(g.neighbor(4, Direction::NORTH_WEST), Some(0));
        assert_eq!(g.neighbors(4).len(), 8);
        assert_eq!(g.neighbors(0).len(), 3);
    }
}
