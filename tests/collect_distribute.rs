mod util;
use util::*;

use dgrid::prelude::*;

#[test]
fn collect_assembles_the_world_on_root() {
    let out = LocalComm::run(4, |comm| {
        let p = Partition::cartesian(comm, torus10()).unwrap();
        let mut f = DoubleGrid2D::new(&p, HaloConfig::default(), -1.0).unwrap();
        fill_owned(&mut f);
        f.collect(2).unwrap()
    });
    for (rank, got) in out.into_iter().enumerate() {
        if rank != 2 {
            assert!(got.is_none());
            continue;
        }
        let world = got.expect("root gets the world");
        assert_eq!(world.rect(), r2([0, 0], [10, 10]));
        for q in world.rect().points() {
            assert_eq!(world.at(&q), Some(&stamp(q)), "{q}");
        }
    }
}

#[test]
fn distribute_of_collect_restores_owned_cells() {
    for config in [HaloConfig::structured(), HaloConfig::rma()] {
        let out = LocalComm::run(4, |comm| {
            let p = committed(comm, torus10(), &unequal());
            let mut f = DoubleGrid2D::new(&p, config, -1.0).unwrap();
            fill_owned(&mut f);
            let snapshot = f.collect(0).unwrap();
            f.with_storage_mut(|s| s.as_mut_slice().fill(0.0));
            f.distribute(0, snapshot.as_ref()).unwrap();
            let owned_ok = f.local_rect().points().all(|q| f.get(&q) == stamp(q));
            (owned_ok, halo_mismatches(&f, [10, 10]))
        });
        for (rank, (owned_ok, bad)) in out.into_iter().enumerate() {
            assert!(owned_ok, "{config:?} rank {rank}");
            assert!(bad.is_empty(), "{config:?} rank {rank}: {bad:?}");
        }
    }
}

#[test]
fn distribute_spreads_new_values() {
    let out = LocalComm::run(4, |comm| {
        let p = Partition::cartesian(comm, torus10()).unwrap();
        let mut f = IntGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        let source = (p.rank() == 1).then(|| {
            let world = r2([0, 0], [10, 10]);
            let cells = world.points().map(|q| (q[0] + q[1]) as i32).collect();
            VecStorage::from_vec(world, cells).unwrap()
        });
        f.distribute(1, source.as_ref()).unwrap();
        (f.local_sum(), f.get(&f.halo_rect().lo))
    });
    // each quadrant sums 25 cells of x + y
    let sums: Vec<i32> = out.iter().map(|(s, _)| *s).collect();
    assert_eq!(sums, vec![100, 225, 225, 350]);
    // halo corner of P0 is (9,9) across both seams
    assert_eq!(out[0].1, 18);
}

#[test]
fn missing_source_aborts_everywhere() {
    let out = LocalComm::run(4, |comm| {
        let p = Partition::cartesian(comm, torus10()).unwrap();
        let mut f = DoubleGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        match f.distribute(0, None) {
            Err(HaloError::CollectiveAborted { root, .. }) => root == 0,
            _ => false,
        }
    });
    assert_eq!(out, vec![true; 4]);
}

#[test]
fn undersized_source_aborts_everywhere() {
    let out = LocalComm::run(2, |comm| {
        let p = Partition::cartesian(comm, torus10()).unwrap();
        let mut f = DoubleGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        let small = VecStorage::with_rect(r2([0, 0], [5, 5]), 1.0);
        let err = f.distribute(0, Some(&small)).unwrap_err();
        err.to_string()
    });
    for msg in out {
        assert!(msg.contains("does not cover"), "{msg}");
    }
}
