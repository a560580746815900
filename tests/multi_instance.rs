//! Several instances sharing one in-memory store and lock, the way tabs of
//! one browser profile or processes on one machine would.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use focusdeck_lib::{
    config::InstanceConfig,
    instance::{Instance, InstanceDeps},
    models::{SessionType, TimerSession, TimerStatus},
    notify::LogSoundSink,
    store::SqliteStore,
    HeadlessControl, HeadlessPlayerFactory, JournalEntry, LockService, MemoryLockService,
    MemoryStore, Repository, Settings, StaticSettings, UnavailableLock,
};

struct Cluster {
    store: MemoryStore,
    lock: MemoryLockService,
}

impl Cluster {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            lock: MemoryLockService::new(),
        }
    }

    fn repo(&self) -> Repository {
        Repository::new(Arc::new(self.store.clone()))
    }

    async fn launch(&self, control: &HeadlessControl) -> Instance {
        self.launch_with_lock(control, Arc::new(self.lock.clone()))
            .await
    }

    async fn launch_with_lock(
        &self,
        control: &HeadlessControl,
        lock: Arc<dyn LockService>,
    ) -> Instance {
        let deps = InstanceDeps {
            store: Arc::new(self.store.clone()),
            lock,
            settings: Arc::new(StaticSettings::new(Settings::default())),
            sounds: Arc::new(LogSoundSink),
            players: Arc::new(HeadlessPlayerFactory::new(control.clone())),
        };
        Instance::launch(deps, &config()).await
    }
}

/// The hour-long tick keeps the countdown still so assertions on remaining
/// time are exact.
fn config() -> InstanceConfig {
    InstanceConfig {
        tick_interval: Duration::from_secs(3600),
        lock_poll_interval: Duration::from_millis(20),
        ..InstanceConfig::default()
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let settled = tokio::time::timeout(Duration::from_secs(3), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "timed out waiting for {what}");
}

fn leaders<'a>(instances: impl IntoIterator<Item = &'a Instance>) -> usize {
    instances
        .into_iter()
        .filter(|instance| instance.is_leader())
        .count()
}

fn running(remaining: u32, seconds_since_tick: i64) -> TimerSession {
    let now = Utc::now();
    let mut session = TimerSession::default();
    session.status = TimerStatus::Running;
    session.current_session_id = Some("seeded".into());
    session.time_remaining_seconds = remaining;
    session.last_tick_timestamp = Some(now - chrono::Duration::seconds(seconds_since_tick));
    session.session_started_at = Some(now - chrono::Duration::seconds(1500));
    session
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_leader_and_leadership_survives_termination() {
    let cluster = Cluster::new();
    let mut instances = Vec::new();
    for _ in 0..3 {
        let control = HeadlessControl::new();
        instances.push((cluster.launch(&control).await, control));
    }

    for _ in 0..2 {
        let list = &instances;
        eventually("a leader", || async move {
            leaders(list.iter().map(|(instance, _)| instance)) == 1
        })
        .await;
        for _ in 0..20 {
            assert!(leaders(instances.iter().map(|(instance, _)| instance)) <= 1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let index = instances
            .iter()
            .position(|(instance, _)| instance.is_leader())
            .unwrap();
        let (leader, control) = instances.remove(index);
        let resource = &control;
        eventually("the leader's resource", || async move { resource.is_active() }).await;

        leader.shutdown().await;
        assert!(!control.is_active());
    }

    let (last, control) = instances.pop().unwrap();
    let survivor = &last;
    eventually("the last instance to lead", || async move { survivor.is_leader() }).await;
    last.shutdown().await;
    assert!(!control.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoked_lock_moves_leadership_without_overlap() {
    let cluster = Cluster::new();
    let shared = HeadlessControl::new();
    let a = cluster.launch(&shared).await;
    let b = cluster.launch(&shared).await;

    let (ra, rb) = (&a, &b);
    eventually("a leader", || async move { leaders([ra, rb]) == 1 }).await;
    let first_was_a = a.is_leader();

    assert!(cluster.lock.revoke_holder());
    eventually("the other instance to lead", || async move {
        leaders([ra, rb]) == 1 && ra.is_leader() != first_was_a
    })
    .await;
    let journal = &shared;
    eventually("the new leader's resource", || async move {
        journal
            .journal()
            .iter()
            .filter(|entry| **entry == JournalEntry::Initialize)
            .count()
            == 2
    })
    .await;

    // One resource at a time: the old one is gone before the next starts.
    let lifecycle: Vec<JournalEntry> = shared
        .journal()
        .into_iter()
        .filter(|entry| matches!(entry, JournalEntry::Initialize | JournalEntry::Teardown))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            JournalEntry::Initialize,
            JournalEntry::Teardown,
            JournalEntry::Initialize
        ]
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timer_changes_propagate_to_other_instances() {
    let cluster = Cluster::new();
    let a = cluster.launch(&HeadlessControl::new()).await;
    let b = cluster.launch(&HeadlessControl::new()).await;

    let (ra, rb) = (&a, &b);

    let started = &a.timer().start().await.unwrap();
    eventually("b to see the running timer", || async move {
        rb.local_state().await.timer == *started
    })
    .await;

    let paused = &b.timer().pause().await.unwrap();
    eventually("a to see the pause", || async move {
        ra.local_state().await.timer == *paused
    })
    .await;
    assert!(a.timer().resume().await.is_ok());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_starting_instance_recovers_drift() {
    let cluster = Cluster::new();
    cluster.repo().save_timer(&running(280, 10)).await.unwrap();

    let instance = cluster.launch(&HeadlessControl::new()).await;
    let timer = instance.local_state().await.timer;
    assert_eq!(timer.time_remaining_seconds, 270);
    assert_eq!(timer.status, TimerStatus::Running);

    let stored = cluster.repo().load_timer().await.unwrap().unwrap();
    assert_eq!(stored.time_remaining_seconds, 270);

    instance.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_that_expired_while_nobody_ran_is_recorded_once() {
    let cluster = Cluster::new();
    cluster.repo().save_timer(&running(5, 600)).await.unwrap();

    let controls = [HeadlessControl::new(), HeadlessControl::new()];
    let (a, b) = tokio::join!(cluster.launch(&controls[0]), cluster.launch(&controls[1]));

    for instance in [&a, &b] {
        eventually("the instance to settle on the break", || async move {
            let timer = instance.local_state().await.timer;
            timer.status == TimerStatus::Idle && timer.session_type == SessionType::Break
        })
        .await;
    }

    let history = cluster.repo().history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, "seeded");
    assert_eq!(history[0].session_type, SessionType::Work);
    assert!(!history[0].interrupted);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_volume_changes_reach_the_leader_once() {
    let cluster = Cluster::new();
    let controls = [HeadlessControl::new(), HeadlessControl::new()];
    let a = cluster.launch(&controls[0]).await;
    let b = cluster.launch(&controls[1]).await;

    let (ra, rb) = (&a, &b);
    eventually("a leader", || async move { leaders([ra, rb]) == 1 }).await;
    let (leader_control, follower_control) = if a.is_leader() {
        (&controls[0], &controls[1])
    } else {
        (&controls[1], &controls[0])
    };
    eventually("the initial reconciliation", || async move {
        leader_control
            .journal()
            .contains(&JournalEntry::SetVolume(50))
    })
    .await;

    tokio::join!(a.playback().set_volume(70), b.playback().set_volume(70));

    eventually("the leader to apply the new volume", || async move {
        leader_control
            .journal()
            .contains(&JournalEntry::SetVolume(70))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stored = cluster.repo().load_playback().await.unwrap().unwrap();
    assert_eq!(stored.volume, 70);
    let applied = leader_control
        .journal()
        .into_iter()
        .filter(|entry| *entry == JournalEntry::SetVolume(70))
        .count();
    assert_eq!(applied, 1);
    assert!(follower_control.journal().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn without_a_lock_service_every_instance_leads_degraded() {
    let cluster = Cluster::new();
    let a = cluster
        .launch_with_lock(&HeadlessControl::new(), Arc::new(UnavailableLock))
        .await;
    let b = cluster
        .launch_with_lock(&HeadlessControl::new(), Arc::new(UnavailableLock))
        .await;

    let (ra, rb) = (&a, &b);
    eventually("both to lead", || async move { leaders([ra, rb]) == 2 }).await;
    for instance in [&a, &b] {
        let token = instance.leadership().borrow().clone().unwrap();
        assert!(token.degraded);
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instances_ticking_together_keep_real_time_and_honour_a_pause() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.sqlite3");
    let lock = MemoryLockService::new();
    // Real cadence: 1 s ticks, 250 ms change-feed polling.
    let config = InstanceConfig {
        lock_poll_interval: Duration::from_millis(20),
        ..InstanceConfig::default()
    };

    let mut instances = Vec::new();
    for _ in 0..3 {
        let store = SqliteStore::open(path.clone(), config.store_poll_interval).unwrap();
        let deps = InstanceDeps {
            store: Arc::new(store),
            lock: Arc::new(lock.clone()),
            settings: Arc::new(StaticSettings::new(Settings::default())),
            sounds: Arc::new(LogSoundSink),
            players: Arc::new(HeadlessPlayerFactory::default()),
        };
        instances.push(Instance::launch(deps, &config).await);
        // Stagger the tick phases.
        tokio::time::sleep(Duration::from_millis(330)).await;
    }
    let reader = SqliteStore::open(path, config.store_poll_interval).unwrap();
    let repo = Repository::new(Arc::new(reader));

    let started = instances[0].timer().start().await.unwrap();
    let clock = Instant::now();
    tokio::time::sleep(Duration::from_millis(6200)).await;

    let stored = repo.load_timer().await.unwrap().unwrap();
    let decrease =
        i64::from(started.time_remaining_seconds) - i64::from(stored.time_remaining_seconds);
    let elapsed = clock.elapsed().as_secs() as i64;
    assert!(
        (decrease - elapsed).abs() <= 1,
        "counted {decrease}s in {elapsed}s"
    );

    let paused = instances[1].timer().pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let stored = repo.load_timer().await.unwrap().unwrap();
    assert_eq!(stored.status, TimerStatus::Paused);
    assert_eq!(stored.time_remaining_seconds, paused.time_remaining_seconds);
    for instance in &instances {
        let timer = instance.local_state().await.timer;
        assert_eq!(timer.status, TimerStatus::Paused);
        assert_eq!(timer.time_remaining_seconds, paused.time_remaining_seconds);
    }

    for instance in instances {
        instance.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leadership_lost_during_a_load_leaves_nothing_half_done() {
    let cluster = Cluster::new();
    let held = HeadlessControl::new();
    held.hold_loads(true);
    let a = cluster.launch(&held).await;

    let (ra, gate) = (&a, &held);
    eventually("the leader to start loading", || async move {
        ra.is_leader() && gate.is_loading()
    })
    .await;
    // Queued behind the load in flight.
    a.playback().set_playing(true).await;

    let other = HeadlessControl::new();
    let b = cluster.launch(&other).await;
    assert!(cluster.lock.revoke_holder());

    let rb = &b;
    eventually("the other instance to lead", || async move { rb.is_leader() }).await;
    let next = &other;
    eventually("the new leader to load", || async move {
        next.journal()
            .contains(&JournalEntry::Load("brown-noise".into()))
    })
    .await;

    held.hold_loads(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        held.journal(),
        vec![JournalEntry::Initialize, JournalEntry::Teardown]
    );
    assert!(!held.is_active());
    assert!(!held.is_loading());

    a.shutdown().await;
    b.shutdown().await;
}
