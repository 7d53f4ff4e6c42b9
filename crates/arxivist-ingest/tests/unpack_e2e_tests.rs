//! Dispatcher and worker over one in-process store and queue

mod common;

use arxivist_ingest::storage::{MemoryObjectStore, ObjectStore};
use arxivist_ingest::unpack::{
    ConsumeMode, HandleOutcome, MemoryQueue, UnpackDispatcher, UnpackMessage, UnpackWorker, WorkQueue,
};
use common::{build_tar, build_tar_gz, init_tracing};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "arxivist";

struct Fixture {
    store: Arc<MemoryObjectStore>,
    queue: Arc<MemoryQueue>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        Self {
            store: Arc::new(MemoryObjectStore::new(BUCKET)),
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    fn dispatcher(&self) -> UnpackDispatcher {
        UnpackDispatcher::new(self.store.clone(), self.queue.clone(), "status")
    }

    fn worker(&self) -> Arc<UnpackWorker> {
        Arc::new(UnpackWorker::new(self.store.clone(), "extracted/pdf", "status"))
    }
}

#[tokio::test]
async fn test_dispatch_then_unpack_writes_members_and_marker() {
    let fx = Fixture::new();
    fx.store
        .insert("bulk/001.tar", build_tar(&[("a.pdf", &b"%PDF-a"[..]), ("b.pdf", &b"%PDF-b"[..])]))
        .await;

    let dispatched = fx.dispatcher().scan("bulk/").await.unwrap();
    assert_eq!(dispatched.enqueued, 1);

    let stats = fx
        .worker()
        .run(fx.queue.as_ref(), 1, ConsumeMode::UntilIdle, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.archives_completed, 1);
    assert_eq!(stats.members.members_written, 2);
    assert_eq!(
        fx.store.keys().await,
        vec![
            "bulk/001.tar".to_string(),
            "extracted/pdf/a.pdf".to_string(),
            "extracted/pdf/b.pdf".to_string(),
            "status/bulk/001.tar.processed".to_string(),
        ]
    );
    assert_eq!(&fx.store.get("extracted/pdf/b.pdf").await.unwrap()[..], &b"%PDF-b"[..]);
    assert_eq!(fx.queue.pending(), 0);
    assert_eq!(fx.queue.in_flight(), 0);
}

#[tokio::test]
async fn test_redelivery_after_completion_writes_nothing() {
    let fx = Fixture::new();
    fx.store
        .insert("bulk/001.tar", build_tar(&[("a.pdf", &b"%PDF-a"[..]), ("b.pdf", &b"%PDF-b"[..])]))
        .await;
    let body = UnpackMessage::new("bulk/001.tar", BUCKET).to_body().unwrap();
    let worker = fx.worker();
    let cancel = CancellationToken::new();

    worker.handle(&body, &cancel).await.unwrap();
    let puts_after_first = fx.store.put_count();

    let outcome = worker.handle(&body, &cancel).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Skipped);
    assert_eq!(fx.store.put_count(), puts_after_first);
}

#[tokio::test]
async fn test_second_scan_enqueues_nothing() {
    let fx = Fixture::new();
    fx.store.insert("bulk/001.tar", build_tar(&[("a.pdf", &b"%PDF-a"[..])])).await;
    fx.store.insert("bulk/002.tar.gz", build_tar_gz(&[("c.pdf", &b"%PDF-c"[..])])).await;
    fx.store.insert("bulk/manifest.xml", "<manifest/>").await;

    let first = fx.dispatcher().scan("bulk/").await.unwrap();
    let second = fx.dispatcher().scan("bulk/").await.unwrap();

    assert_eq!(first.archives_seen, 2);
    assert_eq!(first.enqueued, 2);
    assert_eq!(second.enqueued, 2);
    // identical dedup ids collapse into the messages already queued
    assert_eq!(fx.queue.sent(), 2);
    assert_eq!(fx.queue.pending(), 2);
}

#[tokio::test]
async fn test_scan_after_unpack_skips_processed_archives() {
    let fx = Fixture::new();
    fx.store.insert("bulk/001.tar", build_tar(&[("a.pdf", &b"%PDF-a"[..])])).await;
    fx.store.insert("bulk/002.tgz", build_tar_gz(&[("c.pdf", &b"%PDF-c"[..])])).await;

    fx.worker().process("bulk/001.tar", &CancellationToken::new()).await.unwrap();
    let stats = fx.dispatcher().scan("bulk/").await.unwrap();

    assert_eq!(stats.archives_seen, 2);
    assert_eq!(stats.already_processed, 1);
    assert_eq!(stats.enqueued, 1);

    let deliveries = fx.queue.receive(10).await.unwrap();
    let message = UnpackMessage::parse(&deliveries[0].body).unwrap();
    assert_eq!(message, UnpackMessage::new("bulk/002.tgz", BUCKET));
}

#[tokio::test]
async fn test_pool_drains_queue_with_multiple_workers() {
    let fx = Fixture::new();
    for n in 0..5 {
        let member = format!("{:02}.pdf", n);
        fx.store
            .insert(
                format!("bulk/{:03}.tar", n),
                build_tar(&[(member.as_str(), &b"%PDF-x"[..])]),
            )
            .await;
    }
    fx.dispatcher().scan("bulk/").await.unwrap();

    let queue: Arc<dyn WorkQueue> = fx.queue.clone();
    let stats = fx
        .worker()
        .run_pool(queue, 3, 1, ConsumeMode::UntilIdle, CancellationToken::new())
        .await
        .unwrap();

    // a worker may go idle while others still hold messages; whatever is
    // left gets picked up by a second pass
    let leftover = fx
        .worker()
        .run(fx.queue.as_ref(), 10, ConsumeMode::UntilIdle, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.archives_completed + leftover.archives_completed, 5);
    assert_eq!(stats.failures + leftover.failures, 0);
    for n in 0..5 {
        let marker = format!("status/bulk/{:03}.tar.processed", n);
        assert!(fx.store.exists(&marker).await.unwrap(), "missing {}", marker);
    }
}

#[tokio::test]
async fn test_corrupt_archive_stays_unacked_and_unmarked() {
    let fx = Fixture::new();
    fx.store.insert("bulk/bad.tar", vec![b'x'; 1024]).await;
    fx.dispatcher().scan("bulk/").await.unwrap();

    let stats = fx
        .worker()
        .run(fx.queue.as_ref(), 1, ConsumeMode::UntilIdle, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.failures, 1);
    assert_eq!(fx.queue.in_flight(), 1);
    assert!(!fx.store.exists("status/bulk/bad.tar.processed").await.unwrap());

    // visibility timeout expiry makes it deliverable again
    fx.queue.release_all().unwrap();
    assert_eq!(fx.queue.pending(), 1);
}

#[tokio::test]
async fn test_misaddressed_and_garbage_messages_are_dropped() {
    let fx = Fixture::new();
    let queue = fx.queue.as_ref();
    queue.send("not json", "g1", "d1").await.unwrap();
    let foreign = UnpackMessage::new("bulk/001.tar", "some-other-bucket");
    queue
        .send(&foreign.to_body().unwrap(), &foreign.group_id(), "d2")
        .await
        .unwrap();

    let stats = fx
        .worker()
        .run(queue, 10, ConsumeMode::UntilIdle, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.messages_dropped, 2);
    assert_eq!(queue.in_flight(), 0);
    assert_eq!(fx.store.put_count(), 0);
}
