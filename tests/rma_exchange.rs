mod util;
use util::*;

use dgrid::algs::CommTag;
use dgrid::field::{RmaExchanger, WindowLayout};
use dgrid::partitioning::Decomposition;
use dgrid::prelude::*;

#[test]
fn puts_become_visible_at_the_fence() {
    let out = LocalComm::run(4, |comm| {
        let p = committed(comm, torus10(), &quadrants());
        let mut f = DoubleGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        assert_eq!(f.exchange_mode(), ExchangeMode::Rma);
        f.sync().unwrap();
        if p.rank() == 0 {
            f.set(&p2(4, 4), 42.0);
        }
        let before = f.get(&p2(4, 4));
        f.sync().unwrap();
        (before, f.get(&p2(4, 4)))
    });
    assert_eq!(out[0], (42.0, 42.0));
    for seen in &out[1..] {
        assert_eq!(*seen, (0.0, 42.0));
    }
}

#[test]
fn corner_write_fans_out_to_three_neighbours() {
    let out = LocalComm::run(4, |comm| {
        let me = comm.rank();
        let dec = Decomposition::cartesian(torus10(), [2, 2], 1).unwrap();
        let frame = dec.rect(me).unwrap().resize([1, 1]);
        let mut storage = VecStorage::with_rect(frame, 0.0);
        let mut ex = RmaExchanger::build(comm, &dec, CommTag::new(0x4000), 0.0).unwrap();
        assert_eq!(ex.layout(), WindowLayout::Direction);
        assert_eq!(ex.num_windows(), 8);
        ex.fence(&mut storage).unwrap();

        let puts = if me == 0 { ex.on_set(&p2(4, 4), &42.0).unwrap() } else { 0 };
        ex.fence(&mut storage).unwrap();
        (puts, storage.at(&p2(4, 4)).copied())
    });
    assert_eq!(out[0].0, 3);
    // P0 itself only changes storage through `set`
    assert_eq!(out[0].1, Some(0.0));
    for (_, seen) in &out[1..] {
        assert_eq!(*seen, Some(42.0));
    }
}

#[test]
fn reads_beyond_the_windows_are_errors() {
    let out = LocalComm::run(4, |comm| {
        let p = committed(comm, torus10(), &quadrants());
        let f = DoubleGrid2D::with_default(&p, HaloConfig::default()).unwrap();
        // the centre of the diagonally opposite quadrant
        let far = f.local_rect().center().offset([5, 5]).wrap([10, 10]);
        matches!(f.try_get(&far), Err(HaloError::OutOfAoi { .. }))
    });
    assert_eq!(out, vec![true; 4]);
}

#[test]
fn narrow_partitions_use_overlap_windows() {
    let cfg = PartitionConfig::new([4, 8]).with_aoi([2, 2]).toroidal(true);
    for config in [HaloConfig::rma(), HaloConfig::structured()] {
        let out = LocalComm::run(4, |comm| {
            let p = Partition::cartesian_with_dims(comm, cfg, [4, 1]).unwrap();
            let mut f = DoubleGrid2D::new(&p, config, -1.0).unwrap();
            fill_owned(&mut f);
            f.sync().unwrap();
            (f.window_layout(), halo_mismatches(&f, [4, 8]))
        });
        for (rank, (layout, bad)) in out.into_iter().enumerate() {
            assert_eq!(layout, WindowLayout::Overlap);
            assert!(bad.is_empty(), "{config:?} rank {rank}: {bad:?}");
        }
    }
}

#[test]
fn bulk_writes_are_pushed_in_full() {
    let out = LocalComm::run(4, |comm| {
        let p = committed(comm, torus10(), &unequal());
        let mut f = DoubleGrid2D::new(&p, HaloConfig::default(), -1.0).unwrap();
        f.sync().unwrap();
        let local = f.local_rect();
        f.with_storage_mut(|s| {
            for q in local.points() {
                let i = s.global_index(&q).unwrap();
                s.as_mut_slice()[i] = stamp(q);
            }
        });
        f.sync().unwrap();
        halo_mismatches(&f, [10, 10])
    });
    assert!(out.iter().all(Vec::is_empty), "{out:?}");
}
