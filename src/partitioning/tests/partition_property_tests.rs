use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::partitioning::decomposition::Decomposition;
use crate::partitioning::process_grid::{Direction, ProcessGrid};
use crate::partitioning::quad_tree::QuadTree;
use crate::partitioning::tiling::TileIndex;
use crate::partitioning::PartitionConfig;
use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

/// Recursively cut `world` with axis-aligned guillotine cuts into at most
/// `parts` regions.
fn guillotine(world: IntRect<2>, parts: usize, rng: &mut SmallRng) -> Vec<IntRect<2>> {
    let mut out = vec![world];
    while out.len() < parts {
        let i = rng.gen_range(0..out.len());
        let r = out[i];
        let d = rng.gen_range(0..2);
        if r.width(d) < 2 {
            if r.width(1 - d) < 2 {
                break;
            }
            continue;
        }
        let cut = rng.gen_range(r.lo[d] + 1..r.hi[d]);
        let (mut a, mut b) = (r, r);
        a.hi.0[d] = cut;
        b.lo.0[d] = cut;
        out[i] = a;
        out.push(b);
    }
    out
}

#[test]
fn sampled_guillotine_layouts_tile() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let world = IntRect::from_extent([10, 10]);
    for _ in 0..50 {
        let parts = rng.gen_range(1..12);
        let rects = guillotine(world, parts, &mut rng);
        let idx = TileIndex::build(world, &rects).expect("guillotine cuts tile");
        for p in world.points() {
            let owner = idx.owner(&p).unwrap();
            assert!(rects[owner].contains(&p));
        }
    }
}

proptest! {
    #[test]
    fn guillotine_owner_is_unique(seed in any::<u64>(), parts in 1usize..16, w in 2i64..24, h in 2i64..24) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let world = IntRect::from_extent([w, h]);
        let rects = guillotine(world, parts, &mut rng);
        let idx = TileIndex::build(world, &rects).unwrap();
        for p in world.points() {
            let holders: Vec<usize> = rects
                .iter()
                .enumerate()
                .filter(|(_, r)| r.contains(&p))
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(holders, vec![idx.owner(&p).unwrap()]);
        }
    }

    #[test]
    fn direction_and_opposite_are_symmetric(a in 1usize..6, b in 1usize..6, periodic in any::<bool>()) {
        let grid = ProcessGrid::new([a, b], periodic);
        for rank in 0..grid.num_procs() {
            for dir in Direction::<2>::all() {
                if let Some(n) = grid.neighbor(rank, dir) {
                    prop_assert_eq!(grid.neighbor(n, dir.opposite()), Some(rank));
                }
            }
        }
    }

    #[test]
    fn cartesian_owner_agrees_with_containment(
        w in 1i64..30,
        h in 1i64..30,
        da in 1usize..5,
        db in 1usize..5,
        x in -40i64..40,
        y in -40i64..40,
    ) {
        prop_assume!(da as i64 <= w && db as i64 <= h);
        let cfg = PartitionConfig::new([w, h]).toroidal(true);
        let dec = Decomposition::cartesian(cfg, [da, db], 1).unwrap();
        let p = IntPoint::new([x, y]);
        let pid = dec.to_partition_id(&p).unwrap();
        prop_assert!(dec.rect(pid).unwrap().contains(&p.wrap([w, h])));
    }

    #[test]
    fn cartesian_3d_owner_agrees_with_containment(
        extent in prop::array::uniform3(1i64..12),
        dims in prop::array::uniform3(1usize..4),
        p in prop::array::uniform3(-20i64..20),
    ) {
        prop_assume!((0..3).all(|d| dims[d] as i64 <= extent[d]));
        let cfg = PartitionConfig::new(extent).toroidal(true);
        let dec = Decomposition::cartesian(cfg, dims, 1).unwrap();
        let p = IntPoint::new(p);
        let pid = dec.to_partition_id(&p).unwrap();
        prop_assert!(dec.rect(pid).unwrap().contains(&p.wrap(extent)));
        // and the 6 face neighbours are exactly the ranks one step away
        let grid = ProcessGrid::new(dims, true);
        for dir in Direction::<3>::faces() {
            if let Some(n) = grid.neighbor(pid, dir) {
                prop_assert_eq!(grid.neighbor(n, dir.opposite()), Some(pid));
            }
        }
        prop_assert_eq!(Direction::<3>::faces().count(), 6);
    }

    #[test]
    fn quad_tree_leaves_tile_after_random_moves(seed in any::<u64>(), k in 0usize..4) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let world = IntRect::from_extent([32, 32]);
        let procs = 1 + 3 * k;
        let mut tree = QuadTree::uniform(world, procs).unwrap();
        let internal: Vec<usize> = tree.nodes().filter(|n| !n.is_leaf()).map(|n| n.id).collect();
        for id in internal {
            let shape = tree.node(id).unwrap().shape;
            if shape.width(0) < 3 || shape.width(1) < 3 {
                continue;
            }
            let o = IntPoint::new([
                rng.gen_range(shape.lo[0] + 1..shape.hi[0]),
                rng.gen_range(shape.lo[1] + 1..shape.hi[1]),
            ]);
            tree.move_origin(id, o).unwrap();
        }
        prop_assume!(tree.validate().is_ok());
        prop_assert!(TileIndex::build(world, &tree.rects_by_processor()).is_ok());
    }
}
