mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{MockProvider, fixture, fixture_with, test_config};
use novel_downloader::base_system::job_id::{BookKey, JobId};
use novel_downloader::download::{
    DownloadError, DownloadOptions, DownloadState, Downloader, JobRegistry, WorkerOutcome,
};
use novel_downloader::storage::{
    ChapterRecord, ChapterStore, StoreError, StoreResult,
};

const TITLE: &str = "Wolf: King?";

fn url() -> String {
    MockProvider::book_url("Wolf: King?")
}

#[test]
fn resume_fetches_only_missing_chapters() {
    let fx = fixture(MockProvider::new(6));
    for i in 0..3 {
        fx.write_valid(TITLE, i);
    }

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let outcome = fx.app.downloader().download(&repo, &url()).unwrap();

    assert_eq!(outcome, WorkerOutcome::Done);
    assert_eq!(fx.provider.fetched(), vec![3, 4, 5]);
    assert_eq!(fx.store.cached_count(fx.job_id(TITLE)), Some(6));
    assert!(fx.app.registry().is_empty());

    let events = fx.events();
    let last = events.last().unwrap();
    assert_eq!(last.state, DownloadState::Done);
    assert_eq!((last.completed, last.total), (6, 6));
    // 刚写完的章节不算剩余，最后一章落盘时剩余时间为 0
    assert_eq!(last.eta_seconds, 0.0);
}

#[test]
fn chapters_land_under_sanitized_directory() {
    let fx = fixture(MockProvider::new(2));
    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    fx.app.downloader().download(&repo, &url()).unwrap();

    let path = fx
        .dir
        .path()
        .join("Mock")
        .join("Tester")
        .join("Wolf King ")
        .join("1.txt");
    let raw = fs::read_to_string(path).unwrap();
    assert_eq!(raw, format!("Chapter 1\n{}", common::body_for(1)));
}

#[test]
fn progress_events_are_in_completion_order() {
    let fx = fixture(MockProvider::new(5));
    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    fx.app.downloader().download(&repo, &url()).unwrap();

    let events = fx.events();
    let downloading: Vec<usize> = events
        .iter()
        .filter(|e| e.state == DownloadState::Downloading)
        .map(|e| e.completed)
        .collect();
    // 首个事件是断点探测后的初始快照
    assert_eq!(downloading, vec![0, 1, 2, 3, 4, 5]);
    assert!(events.iter().all(|e| e.total == 5));
    assert_eq!(events.last().unwrap().state, DownloadState::Done);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.state.is_terminal())
            .count(),
        1
    );
}

#[test]
fn partial_chapter_is_refetched_and_overwritten() {
    let fx = fixture(MockProvider::new(3));
    fx.write_valid(TITLE, 0);
    let dir = fx.dir.path().join("Mock").join("Tester").join("Wolf King ");
    fs::write(dir.join("1.txt"), "x\n").unwrap();
    fx.write_valid(TITLE, 2);

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    fx.app.downloader().download(&repo, &url()).unwrap();

    assert_eq!(fx.provider.fetched(), vec![1]);
    assert!(fs::metadata(dir.join("1.txt")).unwrap().len() > 10);
}

#[test]
fn pause_blocks_new_fetches_until_resume() {
    let fx = fixture(MockProvider::new(5));
    let id = fx.job_id(TITLE);
    let registry = fx.app.registry().clone();
    let (paused_tx, paused_rx) = crossbeam_channel::bounded(1);
    {
        let registry = registry.clone();
        fx.provider.set_hook(move |index| {
            if index == 1 {
                registry.pause(id);
                let _ = paused_tx.try_send(());
            }
        });
    }

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let worker = fx.app.downloader().start(repo, url()).unwrap();

    paused_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(registry.get_state(id), Some(DownloadState::Paused));
    // 正在进行的第 1 章允许完成，之后不再拉取
    assert_eq!(fx.provider.fetched(), vec![0, 1]);

    assert!(registry.resume(id));
    assert_eq!(worker.join().unwrap().unwrap(), WorkerOutcome::Done);
    assert_eq!(fx.provider.fetched(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn paused_time_does_not_inflate_eta() {
    let fx = fixture(MockProvider::new(4));
    let id = fx.job_id(TITLE);
    let registry = fx.app.registry().clone();
    let (paused_tx, paused_rx) = crossbeam_channel::bounded(1);
    {
        let registry = registry.clone();
        fx.provider.set_hook(move |index| {
            if index == 1 {
                registry.pause(id);
                let _ = paused_tx.try_send(());
            }
        });
    }

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let worker = fx.app.downloader().start(repo, url()).unwrap();
    paused_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(600));
    assert!(registry.resume(id));
    assert_eq!(worker.join().unwrap().unwrap(), WorkerOutcome::Done);

    // 每个已完成章节数对应的单章平均耗时
    let mut avg = std::collections::BTreeMap::new();
    for e in fx.events() {
        if !e.state.is_terminal() && e.total > e.completed {
            avg.insert(e.completed, e.eta_seconds / (e.total - e.completed) as f64);
        }
    }
    assert_eq!(avg.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    // 拉取都是瞬时的：平均值按 0.95 递减，暂停的 600ms 不能算进去
    assert!(avg[&3] < avg[&2]);
    assert!(avg[&3] < 0.95f64.powi(3) + 0.01, "avg {}", avg[&3]);
}

#[test]
fn stop_during_fetch_discards_the_result() {
    let fx = fixture(MockProvider::new(5));
    let id = fx.job_id(TITLE);
    {
        let registry = fx.app.registry().clone();
        fx.provider.set_hook(move |index| {
            if index == 2 {
                registry.stop(id);
            }
        });
    }

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let outcome = fx.app.downloader().download(&repo, &url()).unwrap();

    assert_eq!(outcome, WorkerOutcome::Stopped);
    assert_eq!(fx.provider.fetched(), vec![0, 1, 2]);
    let key = fx.key(TITLE);
    assert!(fx.store.chapter_len(&key, 1).is_some());
    assert!(fx.store.chapter_len(&key, 2).is_none());
    assert_eq!(fx.app.registry().get_state(id), None);

    let events = fx.events();
    let last = events.last().unwrap();
    assert_eq!(last.state, DownloadState::Stopped);
    assert_eq!(last.completed, 2);
}

#[test]
fn duplicate_start_is_a_no_op() {
    let fx = fixture(MockProvider::new(3));
    let id = fx.job_id(TITLE);
    let _held = fx.app.registry().start(id).unwrap();

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let outcome = fx.app.downloader().download(&repo, &url()).unwrap();

    assert_eq!(outcome, WorkerOutcome::AlreadyRunning);
    assert!(fx.provider.fetched().is_empty());
    assert_eq!(fx.app.registry().get_state(id), Some(DownloadState::Downloading));
}

#[test]
fn concurrent_admission_has_one_winner() {
    let fx = fixture(MockProvider::new(3));
    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let record = repo.load(&url(), true).unwrap();
    let downloader = fx.app.downloader().clone();

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| downloader.admit(&repo, &record).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    let mut admitted: Vec<_> = handles.into_iter().flatten().collect();
    assert_eq!(admitted.len(), 1);
    let handle = admitted.pop().unwrap();
    assert_eq!(handle.id(), fx.job_id(TITLE));
    assert_eq!(
        fx.app.registry().get_state(handle.id()),
        Some(DownloadState::Downloading)
    );
    // 登记之后、线程启动之前，重复提交同样被拒绝
    assert!(downloader.admit(&repo, &record).unwrap().is_none());

    let worker = downloader
        .spawn_admitted(handle, repo.clone(), record.clone())
        .unwrap();
    assert_eq!(worker.join().unwrap().unwrap(), WorkerOutcome::Done);
    assert_eq!(fx.provider.fetched(), vec![0, 1, 2]);
    assert!(fx.app.registry().is_empty());
}

#[test]
fn download_info_reports_contiguous_prefix() {
    let fx = fixture(MockProvider::new(5));
    for i in 0..3 {
        fx.write_valid(TITLE, i);
    }
    let info = fx.app.downloader().download_info(&fx.key(TITLE), 5);
    assert_eq!(info.count, 3);
    assert_eq!(info.id, fx.job_id(TITLE));
}

#[test]
fn stale_cached_count_is_rewound() {
    let fx = fixture(MockProvider::new(8));
    for i in 0..2 {
        fx.write_valid(TITLE, i);
    }
    fx.store.store_cached_count(fx.job_id(TITLE), 7).unwrap();

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    fx.app.downloader().download(&repo, &url()).unwrap();
    assert_eq!(fx.provider.fetched(), (2..8).collect::<Vec<_>>());
}

#[test]
fn transient_failures_are_retried() {
    let fx = fixture(MockProvider::new(3));
    fx.provider.fail_times(1, 2);

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let outcome = fx.app.downloader().download(&repo, &url()).unwrap();

    assert_eq!(outcome, WorkerOutcome::Done);
    assert_eq!(fx.provider.fetched(), vec![0, 1, 1, 1, 2]);
}

#[test]
fn exhausted_retries_fail_the_job() {
    let config = novel_downloader::base_system::context::Config {
        max_fetch_attempts: 2,
        ..test_config()
    };
    let fx = fixture_with(MockProvider::new(3), config);
    fx.provider.fail_times(1, 10);

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let err = fx.app.downloader().download(&repo, &url()).unwrap_err();

    assert!(matches!(
        err,
        DownloadError::RetriesExhausted {
            index: 1,
            attempts: 2
        }
    ));
    assert!(fx.app.registry().is_empty());
    assert_eq!(fx.events().last().unwrap().state, DownloadState::Failed);
}

#[test]
fn stop_interrupts_retry_backoff() {
    let config = novel_downloader::base_system::context::Config {
        retry_backoff_ms: 60_000,
        ..test_config()
    };
    let fx = fixture_with(MockProvider::new(3), config);
    fx.provider.fail_times(0, usize::MAX);
    let id = fx.job_id(TITLE);

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let worker = fx.app.downloader().start(repo, url()).unwrap();
    while fx.provider.fetched().is_empty() {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(fx.app.registry().stop(id));
    assert_eq!(worker.join().unwrap().unwrap(), WorkerOutcome::Stopped);
}

#[test]
fn panicking_provider_marks_job_failed() {
    let fx = fixture(MockProvider::new(3));
    fx.provider.set_hook(|index| {
        if index == 1 {
            panic!("scraper exploded");
        }
    });

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let err = fx.app.downloader().download(&repo, &url()).unwrap_err();

    assert!(matches!(err, DownloadError::Panicked(ref msg) if msg.contains("exploded")));
    assert!(fx.app.registry().is_empty());
    assert_eq!(fx.events().last().unwrap().state, DownloadState::Failed);
}

#[test]
fn cover_is_saved_next_to_chapters() {
    let fx = fixture(MockProvider::new(1));
    fx.provider.set_cover(vec![0xFF, 0xD8, 0xFF]);

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    fx.app.downloader().download(&repo, &url()).unwrap();

    let book = fx.store.read_book(&fx.key(TITLE)).unwrap();
    assert_eq!(book.cover, Some(vec![0xFF, 0xD8, 0xFF]));
    assert_eq!(book.chapters.len(), 1);
    assert_eq!(book.chapters[0].title, "Chapter 0");
}

#[test]
fn jobs_for_different_books_run_concurrently() {
    let fx = fixture(MockProvider::new(3));
    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let a = fx
        .app
        .downloader()
        .start(repo.clone(), MockProvider::book_url("A"))
        .unwrap();
    let b = fx
        .app
        .downloader()
        .start(repo, MockProvider::book_url("B"))
        .unwrap();
    assert_eq!(a.join().unwrap().unwrap(), WorkerOutcome::Done);
    assert_eq!(b.join().unwrap().unwrap(), WorkerOutcome::Done);
    assert_eq!(fx.provider.fetched().len(), 6);
}

/// 拒绝写入的存储。
struct ReadOnlyStore;

impl ChapterStore for ReadOnlyStore {
    fn chapter_len(&self, _key: &BookKey, _index: usize) -> Option<u64> {
        None
    }

    fn write_chapter(&self, _key: &BookKey, _record: &ChapterRecord) -> StoreResult<()> {
        Err(StoreError::PermissionDenied("/ro".into()))
    }

    fn read_chapter(&self, _key: &BookKey, _index: usize) -> StoreResult<Option<ChapterRecord>> {
        Ok(None)
    }

    fn write_cover(&self, _key: &BookKey, _bytes: &[u8]) -> StoreResult<()> {
        Err(StoreError::PermissionDenied("/ro".into()))
    }

    fn read_cover(&self, _key: &BookKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn cached_count(&self, _id: JobId) -> Option<usize> {
        None
    }

    fn store_cached_count(&self, _id: JobId, _count: usize) -> StoreResult<()> {
        Err(StoreError::PermissionDenied("/ro".into()))
    }

    fn check_writable(&self, _key: &BookKey) -> StoreResult<()> {
        Err(StoreError::PermissionDenied("/ro".into()))
    }
}

#[test]
fn unwritable_storage_is_rejected_before_start() {
    let fx = fixture(MockProvider::new(2));
    let registry = Arc::new(JobRegistry::default());
    let downloader = Downloader::new(
        DownloadOptions::from(&test_config()),
        registry.clone(),
        Arc::new(ReadOnlyStore),
    );

    let repo = fx.app.repository(common::PROVIDER).unwrap().clone();
    let err = downloader.download(&repo, &url()).unwrap_err();

    assert!(matches!(
        err,
        DownloadError::Store(StoreError::PermissionDenied(_))
    ));
    assert!(registry.is_empty());
    assert!(fx.provider.fetched().is_empty());
}
