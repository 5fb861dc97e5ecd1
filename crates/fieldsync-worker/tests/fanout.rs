use fieldsync_core::{ClientMessage, SYNC_TAG};
use fieldsync_platform::{Platform, SyncScheduler, WorkerState};
use fieldsync_worker::BackgroundWorker;
use tokio::sync::mpsc::error::TryRecvError;

async fn platform_with_worker() -> Platform {
    let platform = Platform::new(true);
    let handle = BackgroundWorker::install(&platform, 1, SYNC_TAG).await.unwrap();
    assert_eq!(handle.state, WorkerState::Activated);
    platform
}

#[tokio::test]
async fn each_open_page_gets_exactly_one_wakeup() {
    let platform = platform_with_worker().await;
    let mut pages = vec![];
    for i in 0..3 {
        pages.push(platform.open_page(format!("/jobs/{i}")).await);
    }

    platform.register(SYNC_TAG).unwrap();
    let fired = platform.set_online(true).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].outcome, Ok(3));

    for page in &mut pages {
        assert_eq!(page.inbox.try_recv().unwrap(), ClientMessage::SyncEvidenceQueue);
        assert_eq!(page.inbox.try_recv().unwrap_err(), TryRecvError::Empty);
    }
}

#[tokio::test]
async fn no_open_pages_is_a_quiet_no_op() {
    let platform = platform_with_worker().await;
    platform.register(SYNC_TAG).unwrap();
    let fired = platform.set_online(true).await;
    assert_eq!(fired[0].outcome, Ok(0));
    assert!(platform.background_sync().pending_tags().is_empty());
}

#[tokio::test]
async fn pages_open_before_install_are_claimed_and_woken() {
    let platform = Platform::new(true);
    let mut early = platform.open_page("/").await;
    BackgroundWorker::install(&platform, 1, SYNC_TAG).await.unwrap();

    platform.register(SYNC_TAG).unwrap();
    platform.set_online(true).await;
    assert_eq!(early.inbox.try_recv().unwrap(), ClientMessage::SyncEvidenceQueue);
}

#[tokio::test]
async fn closed_page_is_skipped_without_failing_the_event() {
    let platform = platform_with_worker().await;
    let mut alive = platform.open_page("/a").await;
    let gone = platform.open_page("/b").await;
    // page went away without unregistering
    drop(gone);

    platform.register(SYNC_TAG).unwrap();
    let fired = platform.set_online(true).await;
    assert_eq!(fired[0].outcome, Ok(1));
    assert_eq!(alive.inbox.try_recv().unwrap(), ClientMessage::SyncEvidenceQueue);
    // the gone page is pruned from the registry
    assert_eq!(platform.clients().len().await, 1);
}

#[tokio::test]
async fn unknown_tag_wakes_nobody() {
    let platform = platform_with_worker().await;
    let mut page = platform.open_page("/").await;
    platform.register("some-other-sync").unwrap();
    let fired = platform.set_online(true).await;
    assert_eq!(fired[0].outcome, Ok(0));
    assert_eq!(page.inbox.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[tokio::test]
async fn new_version_takes_over_open_pages() {
    let platform = platform_with_worker().await;
    let mut page = platform.open_page("/").await;
    let v2 = BackgroundWorker::install(&platform, 2, SYNC_TAG).await.unwrap();
    assert_eq!(v2.state, WorkerState::Activated);
    assert_eq!(platform.active_version(), Some(2));
    assert_eq!(platform.clients().controlled_by(2).await, 1);

    platform.register(SYNC_TAG).unwrap();
    platform.set_online(true).await;
    assert_eq!(page.inbox.try_recv().unwrap(), ClientMessage::SyncEvidenceQueue);
}
