mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{MockProvider, PROVIDER, fixture, fixture_with, test_config};
use novel_downloader::base_system::context::Config;
use novel_downloader::download::WorkerOutcome;

#[test]
fn repeated_loads_hit_the_shared_cache() {
    let fx = fixture(MockProvider::new(2));
    let repo = fx.app.repository(PROVIDER).unwrap();

    let first = repo.load("/b/Cached", true).unwrap();
    let second = repo.load("https://mock.test/b/Cached", true).unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.provider.record_loads.load(Ordering::SeqCst), 1);

    repo.load("/b/Cached", false).unwrap();
    assert_eq!(fx.provider.record_loads.load(Ordering::SeqCst), 2);
}

#[test]
fn cache_evicts_oldest_book_when_full() {
    let config = Config {
        cache_size: 2,
        ..test_config()
    };
    let fx = fixture_with(MockProvider::new(1), config);
    let repo = fx.app.repository(PROVIDER).unwrap();

    for title in ["A", "B", "C"] {
        repo.load(&MockProvider::book_url(title), true).unwrap();
    }
    assert_eq!(fx.app.cache().len(), 2);
    repo.load(&MockProvider::book_url("A"), true).unwrap();
    assert_eq!(fx.provider.record_loads.load(Ordering::SeqCst), 4);
    repo.load(&MockProvider::book_url("C"), true).unwrap();
    assert_eq!(fx.provider.record_loads.load(Ordering::SeqCst), 4);
}

#[test]
fn rate_limited_provider_serializes_concurrent_jobs() {
    let fx = fixture(MockProvider::new(4).rate_limited(Duration::from_millis(5)));
    let repo = fx.app.repository(PROVIDER).unwrap().clone();

    let workers: Vec<_> = ["A", "B", "C"]
        .into_iter()
        .map(|t| {
            fx.app
                .downloader()
                .start(repo.clone(), MockProvider::book_url(t))
                .unwrap()
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap().unwrap(), WorkerOutcome::Done);
    }

    assert_eq!(fx.provider.fetched().len(), 12);
    assert_eq!(fx.provider.max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn search_goes_through_the_facade() {
    let fx = fixture(MockProvider::new(1));
    let repo = fx.app.repository(PROVIDER).unwrap();
    let hits = repo.search("Dune").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].url, MockProvider::book_url("Dune"));
    // 空 HTML 视为无内容
    assert_eq!(repo.load_html("/b/Dune/c/0"), None);
}

#[test]
fn control_requests_drive_the_registry() {
    use novel_downloader::download::{ControlAction, ControlRequest, DownloadState};

    let fx = fixture(MockProvider::new(50));
    let id = fx.job_id("Long");
    let (tx, rx) = crossbeam_channel::bounded(1);
    fx.provider.set_hook(move |index| {
        if index == 0 {
            let _ = tx.try_send(());
        }
        thread::sleep(Duration::from_millis(2));
    });

    let worker = fx.app.start_download(PROVIDER, "/b/Long").unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(fx.app.control(ControlRequest {
        job_id: id,
        action: ControlAction::from("pause"),
    }));
    assert_eq!(fx.app.registry().get_state(id), Some(DownloadState::Paused));
    assert!(fx.app.control(ControlRequest {
        job_id: id,
        action: ControlAction::from("???"),
    }));
    assert_eq!(
        fx.app.registry().get_state(id),
        Some(DownloadState::Downloading)
    );
    assert!(fx.app.control(ControlRequest {
        job_id: id,
        action: ControlAction::Stop,
    }));
    assert_eq!(worker.join().unwrap().unwrap(), WorkerOutcome::Stopped);
    assert!(!fx.app.control(ControlRequest {
        job_id: id,
        action: ControlAction::Pause,
    }));
}
