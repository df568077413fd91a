use super::*;
use crate::algs::communicator::{LocalComm, NoComm};
use crate::topology::point::Int2D;

#[path = "partition_property_tests.rs"]
mod partition_property_tests;

fn r(lo: [i64; 2], hi: [i64; 2]) -> IntRect<2> {
    IntRect::new(Int2D::new(lo), Int2D::new(hi))
}

fn config() -> PartitionConfig<2> {
    PartitionConfig::new([10, 10]).with_aoi([1, 1]).toroidal(true)
}

/// P0 shrunk to [0,4)x[0,6); the others take up the slack.
fn unequal() -> [IntRect<2>; 4] {
    [
        r([0, 0], [4, 6]),
        r([0, 6], [4, 10]),
        r([4, 0], [10, 5]),
        r([4, 5], [10, 10]),
    ]
}

#[test]
fn single_rank_stage_and_commit() {
    let mut p = Partition::non_uniform(NoComm, config()).unwrap();
    assert!(matches!(p.to_partition_id(&Int2D::new([0, 0])), Err(PartitionError::NotCommitted)));
    p.insert_partition(0, config().world()).unwrap();
    assert!(matches!(
        p.insert_partition(0, config().world()),
        Err(PartitionError::DuplicatePartition(0))
    ));
    p.commit().unwrap();
    assert_eq!(p.epoch(), 1);
    assert_eq!(p.to_partition_id(&Int2D::new([-3, 12])).unwrap(), 0);
    assert!(p.neighbor_ids().unwrap().is_empty());

    p.update_partition(0, r([0, 0], [5, 10])).unwrap();
    let err = p.commit().unwrap_err();
    assert!(matches!(err, PartitionError::CommitRejected { ref ranks, .. } if ranks == &[0]));
    // previous decomposition survives, staging is gone
    assert_eq!(p.epoch(), 1);
    assert_eq!(p.local_rect().unwrap(), config().world());
    assert!(!p.has_staged());
}

#[test]
fn cartesian_rejects_staging() {
    let mut p = Partition::cartesian(NoComm, config()).unwrap();
    assert!(matches!(
        p.update_partition(0, config().world()),
        Err(PartitionError::Unsupported { layout: "cartesian", .. })
    ));
    assert!(matches!(p.balance(1.0, 0), Err(PartitionError::Unsupported { .. })));
    assert!(p.group(0).is_err());
}

#[test]
fn four_ranks_commit_unequal_layout() {
    let out = LocalComm::run(4, |comm| {
        let mut p = Partition::non_uniform(comm, config()).unwrap();
        p.init_uniformly(None).unwrap();
        p.commit().unwrap();
        let before = (p.local_rect().unwrap(), p.process_grid().map(|g| g.dims()));
        for (pid, rect) in unequal().into_iter().enumerate() {
            p.update_partition(pid, rect).unwrap();
        }
        p.commit().unwrap();
        (
            before,
            p.local_rect().unwrap(),
            p.epoch(),
            p.process_grid().is_some(),
            p.to_partition_id(&Int2D::new([4, 5])).unwrap(),
        )
    });
    for (rank, (before, after, epoch, grid, owner)) in out.into_iter().enumerate() {
        assert_eq!(before.1, Some([2, 2]));
        assert_eq!(after, unequal()[rank]);
        assert_eq!(epoch, 2);
        assert!(!grid);
        assert_eq!(owner, 3);
        if rank == 0 {
            assert_eq!(before.0, r([0, 0], [5, 5]));
        }
    }
}

#[test]
fn disagreeing_ranks_reject_everywhere() {
    let out = LocalComm::run(4, |comm| {
        let me = comm.rank();
        let mut p = Partition::non_uniform(comm, config()).unwrap();
        p.init_uniformly(None).unwrap();
        p.commit().unwrap();
        if me == 2 {
            // rank 2 alone stages an overlap
            p.update_partition(2, r([3, 0], [10, 5])).unwrap();
        }
        (p.commit(), p.epoch())
    });
    for (res, epoch) in out {
        match res {
            Err(PartitionError::CommitRejected { ranks, reason }) => {
                assert_eq!(ranks, vec![2]);
                assert!(reason.contains("overlap"), "{reason}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(epoch, 1);
    }
}

#[test]
fn balance_moves_root_towards_load() {
    let cfg = PartitionConfig::new([20, 20]).with_aoi([1, 1]);
    let out = LocalComm::run(4, move |comm| {
        let me = comm.rank();
        let mut p = Partition::quad_tree(comm, cfg).unwrap();
        let group = p.group(0).unwrap().unwrap();
        let runtime = if me == 3 { 5.0 } else { 1.0 };
        let moved = p.balance(runtime, 0).unwrap();
        let idle = p.balance(1.0, 1).unwrap();
        (group.master, moved, idle, p.local_rect().unwrap(), p.epoch())
    });
    // centres (5,5) (5,15) (15,5) (15,15), weights 1 1 1 5 -> (12, 12)
    let expect = [
        r([0, 0], [12, 12]),
        r([0, 12], [12, 20]),
        r([12, 0], [20, 12]),
        r([12, 12], [20, 20]),
    ];
    for (rank, (master, moved, idle, rect, epoch)) in out.into_iter().enumerate() {
        assert_eq!(master, 0);
        assert_eq!(moved, 1);
        assert_eq!(idle, 0);
        assert_eq!(rect, expect[rank]);
        assert_eq!(epoch, 2);
    }
}

#[test]
fn staged_tree_edits_commit_collectively() {
    let cfg = PartitionConfig::new([16, 16]).with_aoi([1, 1]);
    let out = LocalComm::run(4, move |comm| {
        let mut p = Partition::quad_tree(comm, cfg).unwrap();
        p.move_origin(quad_tree::ROOT, Int2D::new([4, 8])).unwrap();
        p.commit().unwrap();
        (p.local_rect().unwrap(), p.neighbor_ids().unwrap())
    });
    assert_eq!(out[0].0, r([0, 0], [4, 8]));
    assert_eq!(out[3].0, r([4, 8], [16, 16]));
    assert_eq!(out[0].1, vec![1, 2, 3]);
}

#[test]
fn tag_blocks_stop_before_wrapping() {
    let p = Partition::cartesian(NoComm, config()).unwrap();
    let first = p.allocate_tags().unwrap();
    assert_eq!(first.as_u16(), FIELD_TAG_BASE);
    let mut last = first;
    let mut blocks = 1;
    while let Ok(tag) = p.allocate_tags() {
        assert!(tag.as_u16() > last.as_u16());
        last = tag;
        blocks += 1;
    }
    assert_eq!(last.as_u16(), u16::MAX - FIELD_TAG_STRIDE + 1);
    assert_eq!(blocks, (0x1_0000 - usize::from(FIELD_TAG_BASE)) / usize::from(FIELD_TAG_STRIDE));
    // still refused, never back into the partition block
    assert!(matches!(
        p.allocate_tags(),
        Err(PartitionError::TagsExhausted { allocated }) if allocated == blocks
    ));
}
