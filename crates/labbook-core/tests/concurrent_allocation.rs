use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use labbook_core::{FrameworkSettings, Logger, MetricRecord, RunIdAllocator, RunOptions, read_metrics};

#[test]
fn racing_allocators_never_share_an_id() {
    let parent = std::env::temp_dir().join(format!("labbook_race_{}", uuid::Uuid::new_v4()));
    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let parent = parent.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Separate allocators stand in for separate processes.
                let allocator = RunIdAllocator::new(&parent);
                barrier.wait();
                allocator.allocate_or_resume(None).expect("allocate").id()
            })
        })
        .collect();

    let ids: BTreeSet<u64> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker thread"))
        .collect();

    assert_eq!(ids.len(), workers, "every worker must get its own id");
    assert_eq!(ids, (1..=workers as u64).collect());
}

#[test]
fn two_runs_started_together_keep_their_own_data() {
    let parent = std::env::temp_dir().join(format!("labbook_race_runs_{}", uuid::Uuid::new_v4()));
    let settings = FrameworkSettings::default().with_parent_log_dir(&parent);
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |tag: &'static str| {
        let settings = settings.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut logger = Logger::new(&settings, RunOptions::default()).expect("start run");
            logger
                .log_metrics(&MetricRecord::new().with("owner", tag), "train")
                .expect("log");
            logger.handle().clone()
        })
    };

    let (thread_a, thread_b) = (spawn("a"), spawn("b"));
    let a = thread_a.join().expect("thread a");
    let b = thread_b.join().expect("thread b");
    assert_ne!(a.log_id, b.log_id);

    for (handle, tag) in [(a, "a"), (b, "b")] {
        let records = read_metrics(&handle, "train").expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("owner").map(ToString::to_string), Some(tag.to_string()));
    }
}
