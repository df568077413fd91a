#![allow(dead_code)]
use dgrid::prelude::*;

pub fn p2(x: i64, y: i64) -> Int2D {
    Int2D::new([x, y])
}

pub fn r2(lo: [i64; 2], hi: [i64; 2]) -> IntRect2D {
    IntRect::new(Int2D::new(lo), Int2D::new(hi))
}

/// 10×10 torus with a one-cell halo.
pub fn torus10() -> PartitionConfig<2> {
    PartitionConfig::new([10, 10]).with_aoi([1, 1]).toroidal(true)
}

/// P0 [0,5)×[0,5), P1 [0,5)×[5,10), P2 [5,10)×[0,5), P3 [5,10)×[5,10).
pub fn quadrants() -> Vec<IntRect2D> {
    vec![
        r2([0, 0], [5, 5]),
        r2([0, 5], [5, 10]),
        r2([5, 0], [10, 5]),
        r2([5, 5], [10, 10]),
    ]
}

/// The quadrants after P0 shrinks to [0,4)×[0,6).
pub fn unequal() -> Vec<IntRect2D> {
    vec![
        r2([0, 0], [4, 6]),
        r2([0, 6], [4, 10]),
        r2([4, 0], [10, 5]),
        r2([4, 5], [10, 10]),
    ]
}

/// Stage and commit `rects` (one per rank) on a non-uniform partition.
pub fn committed(comm: LocalComm, config: PartitionConfig<2>, rects: &[IntRect2D]) -> Partition<LocalComm, 2> {
    let mut p = Partition::non_uniform(comm, config).expect("config");
    for (pid, r) in rects.iter().enumerate() {
        p.insert_partition(pid, *r).expect("stage");
    }
    p.commit().expect("commit");
    p
}

/// Re-stage every region and commit.
pub fn recommit(p: &mut Partition<LocalComm, 2>, rects: &[IntRect2D]) {
    for (pid, r) in rects.iter().enumerate() {
        p.update_partition(pid, *r).expect("stage");
    }
    p.commit().expect("commit");
}

/// Distinct value for every cell of the world.
pub fn stamp(p: Int2D) -> f64 {
    (p[0] * 100 + p[1]) as f64
}

/// Write `stamp` into every owned cell.
pub fn fill_owned<C: Communicator>(field: &mut DoubleGrid2D<C>) {
    for p in field.local_rect().points() {
        field.set(&p, stamp(p));
    }
}

/// Every halo cell must hold the owner's value of the wrapped point.
pub fn halo_mismatches<C: Communicator>(field: &DoubleGrid2D<C>, extent: [i64; 2]) -> Vec<Int2D> {
    field
        .halo_rect()
        .points()
        .filter(|q| !field.local_rect().contains(q))
        .filter(|q| field.get(q) != stamp(q.wrap(extent)))
        .collect()
}
