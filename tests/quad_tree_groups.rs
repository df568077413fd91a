mod util;
use util::*;

use dgrid::prelude::*;

/// 16×16 with seven leaves: the lower-left quadrant is quartered again.
///
/// | rank | box             |
/// |------|-----------------|
/// | 0    | [0,8)×[8,16)    |
/// | 1    | [8,16)×[0,8)    |
/// | 2    | [8,16)×[8,16)   |
/// | 3..6 | quarters of [0,8)² |
fn seven_leaves(comm: LocalComm) -> Partition<LocalComm, 2> {
    let cfg = PartitionConfig::new([16, 16]).with_aoi([1, 1]).toroidal(true);
    Partition::quad_tree(comm, cfg).unwrap()
}

#[test]
fn uniform_tree_maps_leaves_to_ranks() {
    let out = LocalComm::run(7, |comm| {
        let p = seven_leaves(comm);
        let g1 = p.group(1).unwrap().map(|g| (g.master, g.members, g.shape));
        let g0 = p.group(0).unwrap().map(|g| g.master);
        (p.local_rect().unwrap(), g1, g0)
    });
    assert_eq!(out[0].0, r2([0, 8], [8, 16]));
    assert_eq!(out[3].0, r2([0, 0], [4, 4]));
    assert_eq!(out[6].0, r2([4, 4], [8, 8]));
    for (rank, (_, g1, g0)) in out.into_iter().enumerate() {
        assert_eq!(g0, Some(3));
        if rank < 3 {
            assert!(g1.is_none(), "rank {rank} has no level-1 ancestor");
        } else {
            assert_eq!(g1, Some((3, vec![3, 4, 5, 6], r2([0, 0], [8, 8]))));
        }
    }
}

#[test]
fn group_collect_then_distribute() {
    let out = LocalComm::run(7, |comm| {
        let p = seven_leaves(comm);
        let mut f = DoubleGrid2D::new(&p, HaloConfig::default(), -1.0).unwrap();
        fill_owned(&mut f);
        f.sync().unwrap();

        let gathered = f.collect_group(1).unwrap();
        let checked = gathered.as_ref().map(|s| {
            s.rect() == r2([0, 0], [8, 8]) && s.rect().points().all(|q| s.at(&q) == Some(&stamp(q)))
        });

        let doubled = gathered.map(|s| {
            let rect = s.rect();
            VecStorage::from_vec(rect, s.into_inner().into_iter().map(|v| 2.0 * v).collect()).unwrap()
        });
        f.distribute_group(1, doubled.as_ref()).unwrap();
        let factor = if p.rank() >= 3 { 2.0 } else { 1.0 };
        let owned_ok = f.local_rect().points().all(|q| f.get(&q) == factor * stamp(q));
        (checked, owned_ok)
    });
    for (rank, (checked, owned_ok)) in out.into_iter().enumerate() {
        assert_eq!(checked, (rank == 3).then_some(true), "rank {rank}");
        assert!(owned_ok, "rank {rank}");
    }
}

#[test]
fn whole_tree_group_matches_collect() {
    let out = LocalComm::run(4, |comm| {
        let cfg = PartitionConfig::new([8, 8]).with_aoi([1, 1]);
        let p = Partition::quad_tree(comm, cfg).unwrap();
        let mut f = DoubleGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        fill_owned(&mut f);
        let group = f.collect_group(0).unwrap().map(|s| s.into_inner());
        let all = f.collect(0).unwrap().map(|s| s.into_inner());
        group == all
    });
    assert_eq!(out, vec![true; 4]);
}

#[test]
fn balance_then_reload_keeps_the_field_consistent() {
    let out = LocalComm::run(4, |comm| {
        let cfg = PartitionConfig::new([20, 20]).with_aoi([1, 1]).toroidal(true);
        let mut p = Partition::quad_tree(comm, cfg).unwrap();
        let mut f = DoubleGrid2D::new(&p, HaloConfig::default(), -1.0).unwrap();
        assert_eq!(f.exchange_mode(), ExchangeMode::Rma);
        fill_owned(&mut f);
        f.sync().unwrap();

        let runtime = if p.rank() == 3 { 5.0 } else { 1.0 };
        let moved = p.balance(runtime, 0).unwrap();
        f.reload(&p).unwrap();
        f.sync().unwrap();
        let owned_ok = f.local_rect().points().all(|q| f.get(&q) == stamp(q));
        (moved, f.local_rect(), owned_ok, halo_mismatches(&f, [20, 20]))
    });
    assert_eq!(out[3].1, r2([12, 12], [20, 20]));
    for (rank, (moved, _, owned_ok, bad)) in out.into_iter().enumerate() {
        assert_eq!(moved, 1);
        assert!(owned_ok, "rank {rank}");
        assert!(bad.is_empty(), "rank {rank}: {bad:?}");
    }
}

#[test]
fn balanced_load_keeps_the_epoch() {
    let out = LocalComm::run(4, |comm| {
        let cfg = PartitionConfig::new([20, 20]).with_aoi([1, 1]).toroidal(true);
        let mut p = Partition::quad_tree(comm, cfg).unwrap();
        let mut f = DoubleGrid2D::new(&p, HaloConfig::default(), -1.0).unwrap();
        fill_owned(&mut f);
        let before = (p.epoch(), p.local_rect().unwrap());
        let moved = p.balance(1.0, 0).unwrap();
        // the field never went stale, so no reload is needed
        f.sync().unwrap();
        (moved, before, (p.epoch(), p.local_rect().unwrap()), halo_mismatches(&f, [20, 20]))
    });
    for (rank, (moved, before, after, bad)) in out.into_iter().enumerate() {
        assert_eq!(moved, 0, "rank {rank}");
        assert_eq!(before, after, "rank {rank}");
        assert!(bad.is_empty(), "rank {rank}: {bad:?}");
    }
}

#[test]
fn tree_edits_are_collective() {
    let out = LocalComm::run(4, |comm| {
        let cfg = PartitionConfig::new([16, 16]).with_aoi([1, 1]);
        let mut p = Partition::quad_tree(comm, cfg).unwrap();
        p.move_origin(0, p2(4, 8)).unwrap();
        p.commit().unwrap();
        let owner = p.to_partition_id(&p2(3, 15)).unwrap();
        (p.local_rect().unwrap(), owner)
    });
    assert_eq!(out[0].0, r2([0, 0], [4, 8]));
    assert_eq!(out[3].0, r2([4, 8], [16, 16]));
    assert!(out.iter().all(|&(_, owner)| owner == 1));
}
