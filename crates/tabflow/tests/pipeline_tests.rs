//! End-to-end tests: register a file, submit jobs, observe workers finish them.

mod common;

use std::time::Duration;

use serde_json::{json, Map};

use common::{drain, wait_until, TestHarness};
use tabflow::broadcast::notification::EventAction;
use tabflow::config::AutoJob;
use tabflow::db::{Database, SqliteStore};
use tabflow::error::ErrorCategory;
use tabflow::model::StatusUpdate;
use tabflow::{
    JobStatus, JobStore, Notification, ParameterBag, SubmitError, SubmitRequest, Tabflow,
};

const JOB_TIMEOUT: Duration = Duration::from_secs(15);

const SERIES_CSV: &str = "t,speed,label\n0,1,a\n1,5,b\n2,2,c\n3,8,d\n4,3,e\n";

fn started(harness: &TestHarness) -> Tabflow {
    let mut config = harness.config();
    config.watch.enabled = false;
    let mut app = Tabflow::build(config).expect("Failed to build pipeline");
    app.start().expect("Failed to start pipeline");
    app
}

fn params(value: serde_json::Value) -> ParameterBag {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_upload_then_rolling_mean_completes() {
    let harness = TestHarness::new();
    let app = started(&harness);
    let path = harness.upload_file("series.csv", SERIES_CSV);

    let record = app.register_upload(&path, Map::new()).unwrap();
    assert_eq!(record.source(), Some("upload"));
    assert_eq!(record.metadata["row_count"], 5);

    let receipt = app
        .submit(SubmitRequest::new(
            &record.id,
            "rolling_mean",
            params(json!({"window_size": 2, "columns": ["speed"]})),
        ))
        .unwrap();
    assert_eq!(receipt.status, JobStatus::Pending);

    let job = app.wait_for_job(&receipt.job_id, JOB_TIMEOUT).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
    assert!(job.correlation_id.is_some());
    let result = job.result.expect("completed job carries a result");
    assert_eq!(
        result["series"]["speed_rolling_mean_2"],
        json!([1.0, 3.0, 3.5, 5.0, 5.5])
    );

    app.shutdown();
}

#[test]
fn test_submit_for_unknown_file_creates_nothing() {
    let harness = TestHarness::new();
    let app = started(&harness);

    let err = app
        .submit(SubmitRequest::new("no-such-file", "data_quality", ParameterBag::new()))
        .unwrap_err();
    assert!(matches!(err, SubmitError::NotFound(ref id) if id == "no-such-file"));
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert!(app.jobs_for_file("no-such-file").unwrap().is_empty());

    app.shutdown();
}

#[test]
fn test_missing_column_fails_job_with_column_name() {
    let harness = TestHarness::new();
    let app = started(&harness);
    let path = harness.upload_file("series.csv", SERIES_CSV);
    let record = app.register_upload(&path, Map::new()).unwrap();

    let receipt = app
        .submit(SubmitRequest::new(
            &record.id,
            "scale_column",
            params(json!({"target_column": "altitude", "multiplier": 2})),
        ))
        .unwrap();

    let job = app.wait_for_job(&receipt.job_id, JOB_TIMEOUT).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    let error = job.error.expect("failed job carries an error");
    assert_eq!(error.category, ErrorCategory::Processor);
    assert!(error.message.contains("altitude"), "{}", error.message);

    app.shutdown();
}

#[test]
fn test_notifications_follow_status_order() {
    let harness = TestHarness::new();
    let app = started(&harness);
    let mut rx = app.subscribe();

    let path = harness.upload_file("quality.csv", SERIES_CSV);
    let record = app.register_upload(&path, Map::new()).unwrap();
    let receipt = app
        .submit(SubmitRequest::new(&record.id, "data_quality", ParameterBag::new()))
        .unwrap();
    let job = app.wait_for_job(&receipt.job_id, JOB_TIMEOUT).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|n| matches!(
        n,
        Notification::DataFile { data_file_id, action: EventAction::Registered, .. }
            if *data_file_id == record.id
    )));

    let statuses: Vec<JobStatus> = events
        .iter()
        .filter_map(|n| match n {
            Notification::Job { job_id, status, .. } if *job_id == receipt.job_id => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );

    app.shutdown();
}

#[test]
fn test_jobs_for_file_lists_every_submission() {
    let harness = TestHarness::new();
    let app = started(&harness);
    let path = harness.upload_file("multi.csv", SERIES_CSV);
    let record = app.register_upload(&path, Map::new()).unwrap();

    let mut ids = Vec::new();
    for job_type in ["data_quality", "peak_detection", "rolling_mean"] {
        let receipt = app
            .submit(SubmitRequest::new(&record.id, job_type, ParameterBag::new()))
            .unwrap();
        ids.push(receipt.job_id);
    }
    for id in &ids {
        let job = app.wait_for_job(id, JOB_TIMEOUT).unwrap().unwrap();
        assert!(job.status.is_terminal(), "job {} still {:?}", id, job.status);
    }

    let listed = app.jobs_for_file(&record.id).unwrap();
    assert_eq!(listed.len(), 3);
    for id in &ids {
        assert!(listed.iter().any(|j| &j.id == id));
    }

    app.shutdown();
}

#[test]
fn test_jobs_queued_before_workers_start_complete() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.watch.enabled = false;
    config.worker_count = 1;
    let mut app = Tabflow::build(config).unwrap();

    let path = harness.upload_file("drain.csv", SERIES_CSV);
    let record = app.register_upload(&path, Map::new()).unwrap();
    let mut ids = Vec::new();
    for _ in 0..4 {
        let receipt = app
            .submit(SubmitRequest::new(&record.id, "data_quality", ParameterBag::new()))
            .unwrap();
        ids.push(receipt.job_id);
    }
    for id in &ids {
        assert_eq!(app.job(id).unwrap().unwrap().status, JobStatus::Pending);
    }

    app.start_workers().unwrap();
    let jobs: Vec<_> = ids
        .iter()
        .map(|id| app.wait_for_job(id, JOB_TIMEOUT).unwrap().unwrap())
        .collect();
    app.shutdown();

    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

#[test]
fn test_sqlite_store_keeps_records_across_restarts() {
    let harness = TestHarness::new();
    let db_path = harness.base().join("state").join("tabflow.db");

    let job_id;
    let file_id;
    {
        let mut config = harness.config();
        config.watch.enabled = false;
        config.database = Some(db_path.clone());
        let mut app = Tabflow::build(config).unwrap();
        app.start().unwrap();

        let path = harness.upload_file("persist.csv", SERIES_CSV);
        let record = app.register_upload(&path, Map::new()).unwrap();
        let receipt = app
            .submit(SubmitRequest::new(&record.id, "data_quality", ParameterBag::new()))
            .unwrap();
        let job = app.wait_for_job(&receipt.job_id, JOB_TIMEOUT).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        job_id = receipt.job_id;
        file_id = record.id;
        app.shutdown();
    }

    let mut config = harness.config();
    config.watch.enabled = false;
    config.database = Some(db_path);
    let app = Tabflow::build(config).unwrap();

    let files = app.data_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, file_id);
    let job = app.job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.result.is_some());
    app.shutdown();
}

#[test]
fn test_restart_resumes_pending_and_fails_interrupted_jobs() {
    let harness = TestHarness::new();
    let db_path = harness.base().join("state").join("tabflow.db");
    let mut config = harness.config();
    config.watch.enabled = false;
    config.database = Some(db_path.clone());

    let (waiting, interrupted) = {
        let app = Tabflow::build(config.clone()).unwrap();
        let path = harness.upload_file("resume.csv", SERIES_CSV);
        let record = app.register_upload(&path, Map::new()).unwrap();
        let waiting = app
            .submit(SubmitRequest::new(&record.id, "data_quality", ParameterBag::new()))
            .unwrap();
        let interrupted = app
            .submit(SubmitRequest::new(&record.id, "peak_detection", ParameterBag::new()))
            .unwrap();
        app.stop();
        (waiting.job_id, interrupted.job_id)
    };

    // A worker that claimed the job and then died with the process.
    let store = SqliteStore::new(Database::open(&db_path).unwrap());
    assert!(store
        .compare_and_set_status(
            &interrupted,
            JobStatus::Pending,
            &StatusUpdate::Running {
                worker_id: "tabflow-worker-0".into()
            },
        )
        .unwrap());
    drop(store);

    let mut app = Tabflow::build(config).unwrap();
    let failed = app.job(&interrupted).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("interrupted job carries an error");
    assert_eq!(error.category, ErrorCategory::TransientIo);
    assert!(error.message.contains("interrupted"), "{}", error.message);
    assert_eq!(app.job(&waiting).unwrap().unwrap().status, JobStatus::Pending);

    app.start_workers().unwrap();
    let resumed = app.wait_for_job(&waiting, JOB_TIMEOUT).unwrap().unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert!(resumed.result.is_some());
    app.shutdown();
}

#[test]
fn test_auto_jobs_run_for_watched_files() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.auto_jobs = vec![AutoJob {
        job_type: "data_quality".into(),
        parameters: ParameterBag::new(),
    }];
    let mut app = Tabflow::build(config).unwrap();
    app.start().unwrap();

    harness.drop_file("first.csv", SERIES_CSV);
    harness.drop_file("second.csv", "x,y\n1,2\n3,4\n");

    let ready = wait_until(JOB_TIMEOUT, || {
        let files = app.data_files().unwrap_or_default();
        files.len() == 2
            && files.iter().all(|f| {
                let jobs = app.jobs_for_file(&f.id).unwrap_or_default();
                jobs.len() == 1 && jobs[0].status == JobStatus::Completed
            })
    });
    assert!(ready, "watched files were not ingested and processed in time");

    let files = app.data_files().unwrap();
    let mut names: Vec<_> = files.iter().map(|f| f.filename.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["first.csv", "second.csv"]);
    assert!(files.iter().all(|f| f.source() == Some("watch")));

    app.shutdown();
}
