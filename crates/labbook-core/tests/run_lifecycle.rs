use std::path::PathBuf;

use labbook_core::{
    Error, FrameworkSettings, LaunchError, Logger, MetricRecord, RunOptions, RunStatus, Scalar,
    launch, read_info,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelState {
    epoch: u32,
    weights: Vec<f64>,
}

fn temp_parent(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("labbook_{label}_{}", uuid::Uuid::new_v4()))
}

fn settings_for(parent: &PathBuf) -> FrameworkSettings {
    FrameworkSettings::default().with_parent_log_dir(parent)
}

#[test]
fn sequential_runs_get_consecutive_ids() {
    let parent = temp_parent("sequential");
    let settings = settings_for(&parent);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let logger = Logger::new(&settings, RunOptions::default()).expect("start run");
        ids.push(logger.log_id());
        logger.finish(RunStatus::Complete).expect("finish");
    }

    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    for id in ids {
        let run = parent.join(id.to_string());
        for sub in ["metadata", "metrics", "artifacts"] {
            assert!(run.join(sub).is_dir(), "run {id} lacks {sub}/");
        }
    }
}

#[test]
fn resuming_a_forced_id_appends_to_existing_streams() {
    let parent = temp_parent("resume");
    let settings = settings_for(&parent);

    let mut first = Logger::new(&settings, RunOptions::default()).expect("first run");
    first
        .log_metrics(&MetricRecord::new().with("epoch", 0).with("loss", 1.0), "train")
        .expect("log epoch 0");
    first.log_checkpoint(&ModelState { epoch: 0, weights: vec![0.5] }, "last").expect("checkpoint");
    let log_id = first.log_id();
    drop(first);

    let resumed_settings = settings.clone().with_forced_log_id(Some(log_id as i64));
    let mut resumed = Logger::new(&resumed_settings, RunOptions::default()).expect("resume");
    assert!(resumed.is_resumed());
    assert_eq!(resumed.log_id(), log_id);

    let state: ModelState = resumed.load_checkpoint("last").expect("checkpoint survives");
    assert_eq!(state.epoch, 0);

    resumed
        .log_metrics(&MetricRecord::new().with("epoch", 1).with("acc", 0.7), "train")
        .expect("log epoch 1");

    let records = resumed.read_metrics("train").expect("read");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("epoch"), Some(&Scalar::Int(0)));
    assert_eq!(records[1].get("epoch"), Some(&Scalar::Int(1)));

    let keys = resumed.registered_keys("train").expect("keys");
    assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["acc", "epoch", "loss"]);
}

#[test]
fn checkpoints_round_trip_and_report_absence() {
    let parent = temp_parent("checkpoint");
    let logger = Logger::new(&settings_for(&parent), RunOptions::default()).expect("start");

    match logger.load_checkpoint::<ModelState>("last") {
        Err(Error::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }

    let state = ModelState {
        epoch: 12,
        weights: vec![0.25, -1.5, 3.0],
    };
    logger.log_checkpoint(&state, "last").expect("save");
    assert_eq!(logger.load_checkpoint::<ModelState>("last").expect("load"), state);
}

#[test]
fn unfinished_run_stays_running() {
    let parent = temp_parent("orphan");
    let logger = Logger::new(&settings_for(&parent), RunOptions::default()).expect("start");
    let handle = logger.handle().clone();

    // A writer killed mid-rename leaves only its temp file behind.
    std::fs::write(handle.metadata_dir.join(".info.yaml.deadbeef.tmp"), "status: COMP")
        .expect("stray temp file");
    drop(logger);

    let info = read_info(&handle).expect("info stays readable");
    assert_eq!(info.status, RunStatus::Running);
    assert_eq!(info.end_time, None);
}

#[test]
fn config_and_framework_documents_are_written() {
    let parent = temp_parent("documents");
    let config = serde_json::json!({"optimizer": {"name": "adam", "lr": 0.001}, "epochs": 10});
    let logger = Logger::new(
        &settings_for(&parent),
        RunOptions {
            config: config.clone(),
            command: Some(vec!["python".into(), "train.py".into(), "--epochs=10".into()]),
            code: None,
        },
    )
    .expect("start");

    let written: serde_json::Value = serde_yaml::from_str(
        &std::fs::read_to_string(logger.handle().config_path()).expect("read config"),
    )
    .expect("parse config");
    assert_eq!(written, config);

    let info = logger.info().expect("info");
    assert_eq!(info.cmd, "python train.py --epochs=10");
    assert_eq!(info.current_file_path, "python");
    assert_eq!(info.log_id, logger.log_id());

    assert!(logger.handle().framework_path().is_file());
}

#[test]
fn launch_records_how_the_job_ended() {
    let parent = temp_parent("launch");
    let settings = settings_for(&parent);

    let value = launch(&settings, RunOptions::default(), |logger| {
        logger.log_metrics(&MetricRecord::new().with("loss", 0.1), "train")?;
        Ok::<_, Error>(logger.log_id())
    })
    .expect("job succeeds");
    assert_eq!(value, 1);

    let failed = launch(&settings, RunOptions::default(), |_logger| {
        Err::<(), _>("diverged".to_string())
    });
    assert!(matches!(failed, Err(LaunchError::Job(ref msg)) if msg == "diverged"));

    let panicked = std::panic::catch_unwind(|| {
        let _ = launch(&settings, RunOptions::default(), |_logger| -> Result<(), Error> {
            panic!("out of memory")
        });
    });
    assert!(panicked.is_err());

    let status = |id: u64| {
        let handle = labbook_core::run_dir::open(&parent, id).expect("open run");
        read_info(&handle).expect("info").status
    };
    assert_eq!(status(1), RunStatus::Complete);
    assert_eq!(status(2), RunStatus::Failed);
    assert_eq!(status(3), RunStatus::Failed);
}
