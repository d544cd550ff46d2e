//! End-to-end flow: configuration document in, regions and elements out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use signage::clock::FixedClock;
use signage::config::{
    CacheConfig, ConfigurationCache, ConfigurationProvider, MemorySnapshotStore, SnapshotStore,
};
use signage::domain::Configuration;
use signage::playback::{HeadlessPresenter, PlaylistState};
use signage::scheduler::{EvaluationOutcome, SchedulerConfig, SignageScheduler};
use signage::{Error, Result};

const DOCUMENT: &str = r#"{
    "configurationId": "lobby",
    "schedules": [
        {
            "id": "morning",
            "recurrenceExpression": "0 0 8 * * *",
            "layoutId": "welcome",
            "name": "Welcome",
            "regions": [{
                "id": "main",
                "media": [
                    { "id": "b", "type": "Image", "sourceUrl": "https://cdn.example.com/second.png", "duration": 5, "ordinal": 2 },
                    { "id": "a", "type": "Image", "sourceUrl": "https://cdn.example.com/first.png", "duration": 5, "ordinal": 1 }
                ]
            }]
        },
        {
            "id": "lunch",
            "recurrenceExpression": "0 0 12 * * Mon-Fri",
            "layoutId": "menu",
            "name": "Menu",
            "layoutWidth": 1080,
            "layoutHeight": 1920,
            "regions": [
                {
                    "id": "video",
                    "media": [
                        { "id": "promo", "sourceUrl": "https://cdn.example.com/promo.mp4", "duration": 6, "forceDuration": true }
                    ]
                },
                {
                    "id": "ticker", "units": "px",
                    "left": 0, "top": 1700, "width": 1080, "height": 220, "zIndex": 5,
                    "media": [
                        { "id": "menu", "type": "Image", "sourceUrl": "https://cdn.example.com/menu.png", "duration": 20 }
                    ]
                }
            ]
        },
        { "id": "broken", "recurrenceExpression": "every day at noon", "regions": [] }
    ]
}"#;

/// Serves a JSON document held in memory, or fails while offline.
struct StaticProvider {
    document: Mutex<Option<String>>,
}

impl StaticProvider {
    fn new(document: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            document: Mutex::new(document.map(str::to_string)),
        })
    }
}

#[async_trait]
impl ConfigurationProvider for StaticProvider {
    async fn fetch(&self) -> Result<Configuration> {
        let document = self.document.lock().clone();
        match document {
            Some(document) => Configuration::from_slice(document.as_bytes()),
            None => Err(Error::Other("offline".to_string())),
        }
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, hour, minute, 0).unwrap()
}

struct Player {
    cache: Arc<ConfigurationCache>,
    presenter: Arc<HeadlessPresenter>,
    clock: Arc<FixedClock>,
    scheduler: Arc<SignageScheduler>,
}

async fn player(
    provider: Arc<StaticProvider>,
    snapshots: Option<Arc<MemorySnapshotStore>>,
) -> Player {
    let cache = ConfigurationCache::new(
        provider,
        snapshots.map(|s| s as Arc<dyn SnapshotStore>),
        CacheConfig {
            configuration_id: "lobby".to_string(),
            ..CacheConfig::default()
        },
    )
    .await;
    let presenter = Arc::new(HeadlessPresenter::new());
    let clock = Arc::new(FixedClock::new(at(10, 45)));
    let scheduler = Arc::new(SignageScheduler::new(
        cache.clone(),
        presenter.clone(),
        clock.clone(),
        SchedulerConfig::default(),
    ));
    Player {
        cache,
        presenter,
        clock,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn test_document_to_screen() {
    let p = player(StaticProvider::new(Some(DOCUMENT)), None).await;
    p.cache.refresh().await;

    assert_eq!(
        p.scheduler.evaluate_now().await,
        EvaluationOutcome::Changed {
            schedule_id: "morning".to_string(),
            layout_id: "welcome".to_string(),
        }
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(p.presenter.regions(), vec!["main"]);
    assert_eq!(
        p.presenter.mounted_in("main"),
        vec!["https://cdn.example.com/first.png"]
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        p.presenter.mounted_in("main"),
        vec!["https://cdn.example.com/second.png"]
    );

    // Noon on a Wednesday: the weekday schedule takes over.
    p.clock.set(at(12, 0));
    assert!(matches!(
        p.scheduler.evaluate_now().await,
        EvaluationOutcome::Changed { ref schedule_id, .. } if schedule_id == "lunch"
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let layout = p.scheduler.current_layout().unwrap();
    assert_eq!(layout.resolution.width, 1080);
    assert_eq!(layout.resolution.height, 1920);
    assert_eq!(p.presenter.regions(), vec!["video", "ticker"]);
    assert_eq!(
        p.presenter.mounted_in("video"),
        vec!["https://cdn.example.com/promo.mp4"]
    );
    assert!(p.presenter.mounted_in("main").is_empty());

    let status = p.scheduler.playback_status().await;
    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|s| s.state == PlaylistState::Playing));

    p.scheduler.stop().await;
    assert_eq!(p.presenter.element_count(), 0);
    assert!(p.presenter.regions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forced_video_duration_restarts_in_place() {
    let p = player(StaticProvider::new(Some(DOCUMENT)), None).await;
    p.cache.refresh().await;
    p.clock.set(at(12, 30));
    p.scheduler.evaluate_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    tokio::time::sleep(Duration::from_secs(13)).await;
    let video = p
        .scheduler
        .playback_status()
        .await
        .into_iter()
        .find(|s| s.region_id == "video")
        .unwrap();
    assert_eq!(video.loop_count, 2);
    assert_eq!(video.fast_restarts, 2);
    assert_eq!(video.units_created, 1);

    p.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_start_uses_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    let document = Configuration::from_slice(DOCUMENT.as_bytes()).unwrap();
    store.save("lobby", &document).await.unwrap();

    let p = player(StaticProvider::new(None), Some(store)).await;
    assert!(p.cache.current().is_some());

    let changes = Arc::new(Mutex::new(Vec::new()));
    let seen = changes.clone();
    p.scheduler
        .on_layout_change(move |layout| seen.lock().push(layout.schedule_id.clone()));

    p.scheduler.evaluate_now().await;
    p.cache.refresh().await;
    p.scheduler.evaluate_now().await;

    assert_eq!(*changes.lock(), vec!["morning".to_string()]);
    assert_eq!(p.presenter.regions(), vec!["main"]);
    p.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_all_regions() {
    let p = player(StaticProvider::new(Some(DOCUMENT)), None).await;
    p.cache.refresh().await;
    p.scheduler.evaluate_now().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    p.scheduler.pause_all().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        p.presenter.mounted_in("main"),
        vec!["https://cdn.example.com/first.png"]
    );

    p.scheduler.resume_all().await;
    tokio::time::sleep(Duration::from_millis(3_010)).await;
    assert_eq!(
        p.presenter.mounted_in("main"),
        vec!["https://cdn.example.com/second.png"]
    );
    p.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_running_player_follows_the_clock() {
    let p = player(StaticProvider::new(Some(DOCUMENT)), None).await;
    p.cache.start();
    p.scheduler.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        p.scheduler.current_layout().map(|l| l.layout_id.clone()),
        Some("welcome".to_string())
    );

    p.clock.set(at(12, 0));
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(
        p.scheduler.current_layout().map(|l| l.layout_id.clone()),
        Some("menu".to_string())
    );

    p.scheduler.stop().await;
    p.cache.stop().await;
}
