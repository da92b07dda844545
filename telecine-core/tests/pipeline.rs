mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use common::{Harness, STORAGE_CHAT, server_error};
use telecine_core::blob::{BlobStore, UploadError, UploadReceipt};
use telecine_core::files::reason_path;
use telecine_core::store::{
    Claimed, CompletedUpload, InMemoryCatalog, UploadJobStore, VariantStore,
};
use telecine_core::uploader::{IngestScanner, JobOutcome, UploadWorker, UploaderRuntime};
use telecine_model::{
    BlobLocation, Episode, EpisodeId, JobStatus, Title, TitleId, TitleKind, UserId,
    VariantId, VariantStatus,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

fn worker(harness: &Harness) -> UploadWorker {
    UploadWorker::new(0, harness.ctx.clone(), CancellationToken::new())
}

async fn drain_queue(worker: &UploadWorker) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = worker.run_once().await.expect("worker run") {
        outcomes.push(outcome);
    }
    outcomes
}

#[tokio::test]
async fn ingest_to_ready_removes_file() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"encoded bytes").await;

    let report = IngestScanner::new(harness.ctx.clone())
        .scan_once()
        .await
        .expect("scan");
    assert_eq!(report.queued, 1);

    let jobs = harness.catalog.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
    assert_eq!(jobs[0].attempts, 0);

    let outcomes = drain_queue(&worker(&harness)).await;
    assert_eq!(outcomes.len(), 1);

    let variant = harness
        .catalog
        .variant(VariantId(1))
        .await
        .expect("variant")
        .expect("exists");
    assert_eq!(variant.status, VariantStatus::Ready);
    assert_eq!(variant.blob_file_ref.as_deref(), Some("file-ref-1"));
    assert_eq!(
        variant.blob_location,
        Some(BlobLocation {
            chat_id: STORAGE_CHAT,
            message_id: 1001
        })
    );
    assert_eq!(variant.size_bytes, Some(13));
    assert!(variant.error.is_none());

    let job = harness.catalog.job(jobs[0].id).await.expect("job").expect("exists");
    assert_eq!(job.status, JobStatus::Ready);
    assert!(job.last_error.is_none());
    assert!(!path.exists(), "uploaded file should be deleted without an archive dir");

    let calls = harness.blob.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, STORAGE_CHAT);
}

#[tokio::test]
async fn uploaded_file_is_archived_when_configured() {
    let harness = Harness::builder().with_archive().build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");
    drain_queue(&worker(&harness)).await;

    let archive = harness.archive.as_ref().expect("archive dir");
    assert!(!path.exists());
    assert!(archive.path().join("title_5__a_1__q_2.mp4").exists());
}

#[tokio::test]
async fn transient_errors_then_success_within_budget() {
    let harness = Harness::builder()
        .max_retries(3)
        .script(vec![server_error(), server_error()])
        .build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");
    let outcomes = drain_queue(&worker(&harness)).await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], JobOutcome::Requeued { attempts: 1, .. }));
    assert!(matches!(outcomes[1], JobOutcome::Requeued { attempts: 2, .. }));
    assert!(matches!(outcomes[2], JobOutcome::Uploaded { .. }));

    let job = &harness.catalog.jobs().await[0];
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.attempts, 3);

    let variant = harness
        .catalog
        .variant(VariantId(1))
        .await
        .expect("variant")
        .expect("exists");
    assert!(variant.is_deliverable());
}

#[tokio::test]
async fn transient_errors_exhaust_budget() {
    let harness = Harness::builder()
        .max_retries(2)
        .script(vec![server_error(), server_error()])
        .build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");
    let outcomes = drain_queue(&worker(&harness)).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[1],
        JobOutcome::Failed {
            job_id: harness.catalog.jobs().await[0].id,
            code: "http_500".into()
        }
    );

    let job = &harness.catalog.jobs().await[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("http_500"));

    let variant = harness
        .catalog
        .variant(VariantId(1))
        .await
        .expect("variant")
        .expect("exists");
    assert_eq!(variant.status, VariantStatus::Failed);
    assert!(!variant.is_deliverable());

    let moved = harness.failed.path().join("title_5__a_1__q_2.mp4");
    assert!(!path.exists());
    assert!(moved.exists());
    let reason = tokio::fs::read_to_string(reason_path(&moved)).await.expect("reason");
    assert_eq!(reason.trim(), "http_500");
}

#[tokio::test]
async fn bad_filename_is_quarantined_without_a_job() {
    let harness = Harness::builder().build();
    let path = harness.drop_file("bogus.mp4", b"bytes").await;

    let report = IngestScanner::new(harness.ctx.clone())
        .scan_once()
        .await
        .expect("scan");

    assert_eq!(report.quarantined, 1);
    assert!(harness.catalog.jobs().await.is_empty());
    assert!(!path.exists());
    let moved = harness.failed.path().join("bogus.mp4");
    let reason = tokio::fs::read_to_string(reason_path(&moved)).await.expect("reason");
    assert_eq!(reason.trim(), "bad_filename");
}

#[tokio::test]
async fn unknown_variant_is_quarantined() {
    let harness = Harness::builder().build();
    harness.drop_file("title_9__a_1__q_1.mp4", b"bytes").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    assert!(harness.catalog.jobs().await.is_empty());
    let moved = harness.failed.path().join("title_9__a_1__q_1.mp4");
    let reason = tokio::fs::read_to_string(reason_path(&moved)).await.expect("reason");
    assert_eq!(reason.trim(), "variant_not_found");
}

#[tokio::test]
async fn oversized_file_is_rejected_with_size() {
    let harness = Harness::builder().max_file_size(4).build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"too many bytes").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    assert!(harness.catalog.jobs().await.is_empty());
    let moved = harness.failed.path().join("title_5__a_1__q_2.mp4");
    let reason = tokio::fs::read_to_string(reason_path(&moved)).await.expect("reason");
    assert_eq!(reason.trim(), "file_too_large:14");
}

#[tokio::test]
async fn rejected_file_stays_without_failed_dir() {
    let harness = Harness::builder().without_failed_dir().build();
    let path = harness.drop_file("bogus.mp4", b"bytes").await;

    let report = IngestScanner::new(harness.ctx.clone())
        .scan_once()
        .await
        .expect("scan");

    assert_eq!(report.left_in_place, 1);
    assert!(path.exists());
}

#[tokio::test]
async fn repeated_scans_create_one_job() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    let scanner = IngestScanner::new(harness.ctx.clone());
    let first = scanner.scan_once().await.expect("scan");
    let second = scanner.scan_once().await.expect("scan");

    assert_eq!(first.queued, 1);
    assert_eq!(second.queued, 0);
    assert_eq!(second.in_flight, 1);
    assert_eq!(harness.catalog.jobs().await.len(), 1);
}

#[tokio::test]
async fn rescan_requests_coalesce_into_one_extra_pass() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.movie_variant(2, 5, 2, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    for _ in 0..3 {
        harness.control.push_raw(r#"{"action":"rescan"}"#).await;
    }
    harness.control.push_raw("not json").await;

    let scanner = IngestScanner::new(harness.ctx.clone());
    let report = scanner.run_cycle().await.expect("cycle");

    // First pass queues the file, the single extra pass sees it in flight.
    assert_eq!(report.queued, 1);
    assert_eq!(report.in_flight, 1);
    assert_eq!(harness.catalog.jobs().await.len(), 1);

    let idle = scanner.run_cycle().await.expect("cycle");
    assert_eq!(idle.in_flight, 1, "no rescan pending, single pass only");
}

#[tokio::test]
async fn released_episode_notifies_subscribers_once() {
    let harness = Harness::builder().build();
    harness
        .catalog
        .insert_title(Title {
            id: TitleId(7),
            kind: TitleKind::Series,
            name: "Тьма".into(),
        })
        .await;
    harness
        .catalog
        .insert_episode(Episode {
            id: EpisodeId(70),
            title_id: TitleId(7),
            season_number: 1,
            episode_number: 3,
            name: None,
            published_at: Some(Utc::now()),
        })
        .await;
    harness.catalog.insert_user(UserId(1), 5001).await;
    harness.catalog.insert_user(UserId(2), 5002).await;
    harness.catalog.subscribe(UserId(1), TitleId(7), true).await;
    harness.catalog.subscribe(UserId(2), TitleId(7), false).await;

    harness.episode_variant(1, 7, 70, 1, 1).await;
    harness.episode_variant(2, 7, 70, 1, 2).await;
    harness.drop_file("title_7__e_70__a_1__q_1.mp4", b"a").await;
    harness.drop_file("title_7_e_70_a_1_q_2.mp4", b"b").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");
    let outcomes = drain_queue(&worker(&harness)).await;
    assert_eq!(outcomes.len(), 2);

    let pushed = harness.bus.pushed().await;
    assert_eq!(pushed.len(), 1, "second variant of the same episode must not re-notify");
    assert_eq!(pushed[0].tg_user_id, 5001);
    assert_eq!(pushed[0].episode_id, EpisodeId(70));
    assert_eq!(pushed[0].title_id, TitleId(7));
}

#[tokio::test]
async fn unpublished_episode_does_not_notify() {
    let harness = Harness::builder().build();
    harness
        .catalog
        .insert_title(Title {
            id: TitleId(7),
            kind: TitleKind::Series,
            name: "Тьма".into(),
        })
        .await;
    harness
        .catalog
        .insert_episode(Episode {
            id: EpisodeId(70),
            title_id: TitleId(7),
            season_number: 1,
            episode_number: 3,
            name: None,
            published_at: None,
        })
        .await;
    harness.catalog.insert_user(UserId(1), 5001).await;
    harness.catalog.subscribe(UserId(1), TitleId(7), true).await;
    harness.episode_variant(1, 7, 70, 1, 1).await;
    harness.drop_file("title_7__e_70__a_1__q_1.mp4", b"a").await;

    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");
    drain_queue(&worker(&harness)).await;

    assert!(harness.bus.pushed().await.is_empty());
}

#[tokio::test]
async fn stale_claims_are_reclaimed_when_enabled() {
    let harness = Harness::builder().max_retries(3).build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;
    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    let claimed = harness.catalog.claim_next().await.expect("claim").expect("job");
    harness
        .catalog
        .backdate_job(claimed.id, Duration::from_secs(3600))
        .await;

    let report = harness
        .catalog
        .reclaim_stale(Duration::from_secs(600), 3)
        .await
        .expect("reclaim");
    assert_eq!(report.requeued, 1);

    let job = harness.catalog.job(claimed.id).await.expect("job").expect("exists");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.last_error.as_deref(), Some("stale_claim"));
}

#[tokio::test]
async fn runtime_processes_files_until_stopped() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    let runtime = UploaderRuntime::start(harness.ctx.clone(), CancellationToken::new());

    let mut ready = false;
    for _ in 0..200 {
        let variant = harness
            .catalog
            .variant(VariantId(1))
            .await
            .expect("variant")
            .expect("exists");
        if variant.is_deliverable() && !path.exists() {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runtime.stop().await;

    assert!(ready, "runtime should upload the dropped file");
}

#[tokio::test]
async fn writes_from_a_reclaimed_claim_are_rejected() {
    let harness = Harness::builder().max_retries(3).build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;
    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    let first = harness.catalog.claim_next().await.expect("claim").expect("job");
    harness
        .catalog
        .backdate_job(first.id, Duration::from_secs(3600))
        .await;
    harness
        .catalog
        .reclaim_stale(Duration::from_secs(600), 3)
        .await
        .expect("reclaim");
    let second = harness.catalog.claim_next().await.expect("claim").expect("job");
    assert_eq!(second.id, first.id);

    assert!(harness.catalog.requeue(&first, "http_500").await.expect("requeue").is_lost());
    assert!(harness.catalog.fail(&first, "forbidden").await.expect("fail").is_lost());
    let completed = harness
        .catalog
        .complete_upload(
            &first,
            &CompletedUpload {
                file_ref: "late".into(),
                location: BlobLocation {
                    chat_id: STORAGE_CHAT,
                    message_id: 1,
                },
                size_bytes: 5,
            },
        )
        .await
        .expect("complete");
    assert!(completed.is_lost());
    assert!(
        harness.catalog.claim_next().await.expect("claim").is_none(),
        "the job is still held by the second claim"
    );

    let job = harness.catalog.job(first.id).await.expect("job").expect("exists");
    assert_eq!(job.status, JobStatus::Uploading);
    assert_eq!(job.attempts, 2);
    assert!(harness.catalog.audit_log().await.is_empty());

    let requeued = harness.catalog.requeue(&second, "http_500").await.expect("requeue");
    assert_eq!(requeued, Claimed::Applied(()));
}

/// Lets the job go stale and hands it to another claimant mid-upload.
struct ReclaimingBlob {
    catalog: InMemoryCatalog,
}

#[async_trait]
impl BlobStore for ReclaimingBlob {
    async fn upload(
        &self,
        _destination: i64,
        _path: &Path,
        _caption: &str,
    ) -> Result<UploadReceipt, UploadError> {
        for job in self.catalog.jobs().await {
            self.catalog
                .backdate_job(job.id, Duration::from_secs(3600))
                .await;
        }
        self.catalog
            .reclaim_stale(Duration::from_secs(600), 5)
            .await
            .expect("reclaim");
        self.catalog
            .claim_next()
            .await
            .expect("claim")
            .expect("reclaimed job");
        Ok(UploadReceipt {
            message_id: 9,
            file_ref: "orphan".into(),
        })
    }
}

#[tokio::test]
async fn worker_that_lost_its_claim_leaves_file_and_rows_alone() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;
    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    let mut ctx = harness.ctx.clone();
    ctx.blob = Arc::new(ReclaimingBlob {
        catalog: harness.catalog.clone(),
    });
    let outcome = UploadWorker::new(0, ctx, CancellationToken::new())
        .run_once()
        .await
        .expect("run")
        .expect("job");

    let job_id = harness.catalog.jobs().await[0].id;
    assert_eq!(outcome, JobOutcome::ClaimLost { job_id });
    assert!(path.exists(), "the new claimant still needs the file");

    let job = harness.catalog.job(job_id).await.expect("job").expect("exists");
    assert_eq!(job.status, JobStatus::Uploading);
    assert_eq!(job.attempts, 2);

    let variant = harness
        .catalog
        .variant(VariantId(1))
        .await
        .expect("variant")
        .expect("exists");
    assert!(!variant.is_deliverable());
    assert_ne!(variant.blob_file_ref.as_deref(), Some("orphan"));
}

#[tokio::test]
async fn failed_file_left_in_ingest_is_not_uploaded_again() {
    let harness = Harness::builder()
        .without_failed_dir()
        .script(vec![
            Err(UploadError::terminal("forbidden", "403")),
            Err(UploadError::terminal("forbidden", "403")),
        ])
        .build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    let scanner = IngestScanner::new(harness.ctx.clone());
    let worker = worker(&harness);
    scanner.scan_once().await.expect("scan");
    drain_queue(&worker).await;

    let report = scanner.scan_once().await.expect("scan");
    let outcomes = drain_queue(&worker).await;

    assert_eq!(report.queued, 0);
    assert_eq!(report.settled, 1);
    assert!(outcomes.is_empty());
    assert_eq!(harness.catalog.jobs().await.len(), 1);
    assert_eq!(harness.blob.calls().await.len(), 1);
    assert!(path.exists());

    let local_path = tokio::fs::canonicalize(&path).await.expect("canonical");
    assert!(
        !harness
            .catalog
            .has_active_job(&local_path.to_string_lossy())
            .await
            .expect("active")
    );
    let variant = harness
        .catalog
        .variant(VariantId(1))
        .await
        .expect("variant")
        .expect("exists");
    assert_eq!(variant.status, VariantStatus::Failed);
}

#[tokio::test]
async fn replaced_file_is_queued_after_a_failed_upload() {
    let harness = Harness::builder()
        .without_failed_dir()
        .script(vec![Err(UploadError::terminal("forbidden", "403"))])
        .build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;

    let scanner = IngestScanner::new(harness.ctx.clone());
    let worker = worker(&harness);
    scanner.scan_once().await.expect("scan");
    drain_queue(&worker).await;

    tokio::fs::write(&path, b"fixed bytes").await.expect("rewrite");
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("open")
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .expect("mtime");

    let report = scanner.scan_once().await.expect("scan");
    assert_eq!(report.queued, 1);
    let outcomes = drain_queue(&worker).await;
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Uploaded { .. }]));
    assert_eq!(harness.catalog.jobs().await.len(), 2);
}

#[tokio::test]
async fn growing_file_waits_for_a_stable_size() {
    let harness = Harness::builder()
        .stability_window(Duration::from_millis(500))
        .build();
    harness.movie_variant(1, 5, 1, 2).await;
    let path = harness.drop_file("title_5__a_1__q_2.mp4", b"first chunk").await;

    let writer = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .expect("open");
            file.write_all(b", second chunk").await.expect("append");
            file.flush().await.expect("flush");
        })
    };

    let scanner = IngestScanner::new(harness.ctx.clone());
    let report = scanner.scan_once().await.expect("scan");
    writer.await.expect("writer");

    assert_eq!(report.unready, 1);
    assert_eq!(report.queued, 0);
    assert_eq!(report.quarantined, 0);
    assert!(harness.catalog.jobs().await.is_empty());
    assert!(path.exists());

    let report = scanner.scan_once().await.expect("scan");
    assert_eq!(report.queued, 1);
    assert_eq!(report.unready, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_hand_out_a_job_once() {
    let harness = Harness::builder().build();
    harness.movie_variant(1, 5, 1, 2).await;
    harness.drop_file("title_5__a_1__q_2.mp4", b"bytes").await;
    IngestScanner::new(harness.ctx.clone()).scan_once().await.expect("scan");

    let claims = (0..8).map(|_| {
        let catalog = harness.catalog.clone();
        tokio::spawn(async move { catalog.claim_next().await.expect("claim") })
    });
    let claimed: Vec<_> = futures::future::join_all(claims)
        .await
        .into_iter()
        .filter_map(|joined| joined.expect("claim task"))
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 1);
    assert_eq!(claimed[0].status, JobStatus::Uploading);
}
