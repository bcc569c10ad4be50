use super::*;
use crate::identity::UserId;

use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

fn at(s: &str) -> Stamp {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

fn span(start: &str, end: &str) -> Span {
    Span::new(at(start), at(end))
}

fn user(name: &str) -> UserId {
    UserId::from_username(name)
}

fn record(owner: &str, start: &str, end: &str) -> Reservation {
    Reservation {
        id: Ulid::new(),
        owner: user(owner),
        span: span(start, end),
    }
}

fn retention() -> TimeDelta {
    TimeDelta::days(DEFAULT_RETENTION_DAYS)
}

// ── Pure conflict tests ──────────────────────────────────

#[test]
fn adjacent_intervals_do_not_conflict() {
    let existing = vec![record("alice", "2023-03-16 10:00", "2023-03-16 11:00")];
    let after = span("2023-03-16 11:00", "2023-03-16 11:30");
    let before = span("2023-03-16 09:00", "2023-03-16 10:00");
    assert!(!has_conflict(&after, &existing));
    assert!(!has_conflict(&before, &existing));
}

#[test]
fn identical_interval_conflicts() {
    let existing = vec![record("alice", "2023-03-16 10:00", "2023-03-16 11:00")];
    let same = span("2023-03-16 10:00", "2023-03-16 11:00");
    assert_eq!(first_conflict(&same, &existing).map(|r| r.id), Some(existing[0].id));
}

#[test]
fn partial_overlap_on_either_side_conflicts() {
    let existing = vec![record("alice", "2023-03-16 10:00", "2023-03-16 11:00")];
    assert!(has_conflict(&span("2023-03-16 09:30", "2023-03-16 10:01"), &existing));
    assert!(has_conflict(&span("2023-03-16 10:59", "2023-03-16 12:00"), &existing));
    assert!(has_conflict(&span("2023-03-16 10:15", "2023-03-16 10:45"), &existing));
    assert!(has_conflict(&span("2023-03-16 08:00", "2023-03-16 13:00"), &existing));
}

#[test]
fn conflict_ignores_owner() {
    let existing = vec![record("alice", "2023-03-16 10:00", "2023-03-16 11:00")];
    // Same span, any requester: the timeline is shared.
    assert!(has_conflict(&span("2023-03-16 10:30", "2023-03-16 11:30"), &existing));
}

// ── Store tests ──────────────────────────────────────────

#[test]
fn store_lists_in_insertion_order() {
    let mut store = InMemoryStore::new();
    let late = record("alice", "2023-03-17 10:00", "2023-03-17 11:00");
    let early = record("bob", "2023-03-16 10:00", "2023-03-16 11:00");
    store.insert(late.clone());
    store.insert(early.clone());

    let ids: Vec<_> = store.list_all().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![late.id, early.id]);
}

#[test]
fn store_delete_by_id() {
    let mut store = InMemoryStore::new();
    let r = record("alice", "2023-03-16 10:00", "2023-03-16 11:00");
    store.insert(r.clone());

    assert_eq!(store.delete_by_id(&r.id), Some(r.clone()));
    assert!(store.is_empty());
    assert_eq!(store.delete_by_id(&r.id), None);
    assert!(store.find_overlapping(&r.span).is_empty());
}

#[test]
fn store_reinsert_replaces() {
    let mut store = InMemoryStore::new();
    let mut r = record("alice", "2023-03-16 10:00", "2023-03-16 11:00");
    store.insert(r.clone());
    r.span = span("2023-03-16 12:00", "2023-03-16 13:00");
    store.insert(r.clone());

    assert_eq!(store.len(), 1);
    assert_eq!(store.find_by_id(&r.id).map(|x| x.span), Some(r.span));
    assert!(store.find_overlapping(&span("2023-03-16 10:00", "2023-03-16 11:00")).is_empty());
}

#[test]
fn store_find_overlapping_matches_linear_scan() {
    let mut store = InMemoryStore::new();
    for (s, e) in [
        ("2023-03-16 08:00", "2023-03-16 09:00"),
        ("2023-03-16 09:00", "2023-03-16 12:00"),
        ("2023-03-16 10:00", "2023-03-16 10:30"),
        ("2023-03-16 13:00", "2023-03-16 14:00"),
        ("2023-03-15 23:00", "2023-03-16 09:30"),
    ] {
        store.insert(record("alice", s, e));
    }

    let query = span("2023-03-16 09:15", "2023-03-16 10:15");
    let mut fast: Vec<_> = store.find_overlapping(&query).into_iter().map(|r| r.id).collect();
    let mut slow: Vec<_> = store
        .list_all()
        .into_iter()
        .filter(|r| r.span.overlaps(&query))
        .map(|r| r.id)
        .collect();
    fast.sort();
    slow.sort();
    assert_eq!(fast, slow);
    assert_eq!(fast.len(), 3);
}

#[test]
fn store_delete_older_than_is_strict() {
    let mut store = InMemoryStore::new();
    let old = record("alice", "2023-03-01 10:00", "2023-03-01 11:00");
    let edge = record("alice", "2023-03-02 10:00", "2023-03-02 11:00");
    store.insert(old.clone());
    store.insert(edge.clone());

    assert_eq!(store.count_older_than(at("2023-03-02 11:00")), 1);
    let removed = store.delete_older_than(at("2023-03-02 11:00"));
    assert_eq!(removed, vec![old]);
    assert_eq!(store.list_all(), vec![&edge]);
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = Engine::new(path.clone(), retention()).unwrap();
    (engine, path)
}

#[tokio::test]
async fn create_then_list_round_trip() {
    let (engine, _) = new_engine("round_trip.wal");
    let alice = user("alice");

    let r = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    assert_eq!(r.owner, alice);
    assert_eq!(r.span, span("2023-03-16 10:00", "2023-03-16 11:00"));

    let listed = engine.list_active_at(at("2023-03-16 12:00")).await.unwrap();
    assert_eq!(listed, vec![r]);
}

#[tokio::test]
async fn create_requires_identity() {
    let (engine, _) = new_engine("unauthenticated.wal");
    let err = engine
        .create_reservation(None, Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthenticated));
    assert_eq!(engine.reservation_count().await, 0);
}

#[tokio::test]
async fn create_rejects_invalid_interval() {
    let (engine, _) = new_engine("invalid_interval.wal");
    let alice = user("alice");

    for (date, time, minutes) in [
        (None, Some("10:00"), Some(60)),
        (Some("2023-03-16"), None, Some(60)),
        (Some("2023-03-16"), Some("10:00"), None),
        (Some("2023-03-16"), Some("10:00"), Some(0)),
        (Some("2023-03-16"), Some("10:00"), Some(-30)),
        (Some("16/03/2023"), Some("10:00"), Some(60)),
    ] {
        let err = engine
            .create_reservation(Some(&alice), date, time, minutes)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval(_)), "{date:?} {time:?} {minutes:?}");
    }
    assert_eq!(engine.reservation_count().await, 0);
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn adjacent_reservations_both_succeed() {
    let (engine, _) = new_engine("adjacent.wal");
    let alice = user("alice");
    let bob = user("bob");

    assert_ok!(
        engine
            .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
            .await
    );
    assert_ok!(
        engine
            .create_reservation(Some(&bob), Some("2023-03-16"), Some("11:00"), Some(30))
            .await
    );
    assert_ok!(
        engine
            .create_reservation(Some(&bob), Some("2023-03-16"), Some("09:00"), Some(60))
            .await
    );
    assert_eq!(engine.reservation_count().await, 3);
}

#[tokio::test]
async fn overlapping_reservation_rejected_for_any_user() {
    let (engine, _) = new_engine("overlap.wal");
    let alice = user("alice");
    let bob = user("bob");

    let first = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();

    for (who, time, minutes) in [
        (&alice, "10:00", 60),
        (&bob, "10:00", 60),
        (&bob, "09:30", 31),
        (&bob, "10:59", 30),
        (&alice, "10:15", 15),
    ] {
        let err = engine
            .create_reservation(Some(who), Some("2023-03-16"), Some(time), Some(minutes))
            .await
            .unwrap_err();
        match err {
            EngineError::SlotConflict(blocking) => assert_eq!(blocking, first.id),
            other => panic!("expected conflict for {time}+{minutes}, got {other:?}"),
        }
    }
    assert_eq!(engine.reservation_count().await, 1);
}

#[tokio::test]
async fn cancel_is_owner_only() {
    let (engine, _) = new_engine("ownership.wal");
    let alice = user("alice");
    let bob = user("bob");

    let r = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();

    let err = engine.cancel_reservation(Some(&bob), r.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFoundOrUnauthorized));
    assert!(engine.find_reservation(&r.id).await.is_some());

    assert_ok!(engine.cancel_reservation(Some(&alice), r.id).await);
    assert!(engine.find_reservation(&r.id).await.is_none());

    // The freed slot can be taken again.
    assert_ok!(
        engine
            .create_reservation(Some(&bob), Some("2023-03-16"), Some("10:00"), Some(60))
            .await
    );
}

#[tokio::test]
async fn cancel_unknown_id_looks_like_foreign_id() {
    let (engine, _) = new_engine("unknown_id.wal");
    let alice = user("alice");

    let err = engine.cancel_reservation(Some(&alice), Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFoundOrUnauthorized));
    assert_eq!(err.to_string(), "reservation not found");
}

#[tokio::test]
async fn cancel_requires_identity() {
    let (engine, _) = new_engine("cancel_unauth.wal");
    let alice = user("alice");
    let r = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();

    assert_err!(engine.cancel_reservation(None, r.id).await);
    assert_eq!(engine.reservation_count().await, 1);
}

#[tokio::test]
async fn owner_comparison_is_case_insensitive() {
    let (engine, _) = new_engine("owner_case.wal");
    let r = engine
        .create_reservation(Some(&user("Alice")), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();

    assert_ok!(engine.cancel_reservation(Some(&user("ALICE")), r.id).await);
}

#[tokio::test]
async fn listing_sweeps_expired_reservations() {
    let (engine, _) = new_engine("retention.wal");
    let alice = user("alice");

    let stale = engine
        .create_reservation(Some(&alice), Some("2023-03-01"), Some("10:00"), Some(60))
        .await
        .unwrap();
    let recent = engine
        .create_reservation(Some(&alice), Some("2023-03-06"), Some("10:00"), Some(60))
        .await
        .unwrap();

    // now - 7d = 2023-03-02 11:00: 8 days old is gone, 3 days old stays.
    let listed = engine.list_active_at(at("2023-03-09 11:00")).await.unwrap();
    assert_eq!(listed, vec![recent]);
    assert!(engine.find_reservation(&stale.id).await.is_none());
}

#[tokio::test]
async fn sweep_boundary_is_strict() {
    let (engine, _) = new_engine("retention_edge.wal");
    let alice = user("alice");

    engine
        .create_reservation(Some(&alice), Some("2023-03-01"), Some("10:00"), Some(60))
        .await
        .unwrap();

    // end == cutoff exactly: kept.
    assert_eq!(engine.sweep_expired(at("2023-03-08 11:00")).await.unwrap(), 0);
    assert_eq!(engine.sweep_expired(at("2023-03-08 11:01")).await.unwrap(), 1);
    assert_eq!(engine.reservation_count().await, 0);
}

#[tokio::test]
async fn sweep_with_nothing_expired_writes_nothing() {
    let (engine, _) = new_engine("sweep_noop.wal");
    let alice = user("alice");
    engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    let before = engine.wal_appends_since_compact().await;

    engine.list_active_at(at("2023-03-16 12:00")).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, before);
}

#[tokio::test]
async fn owner_listing_filters_and_sweeps() {
    let (engine, _) = new_engine("owner_listing.wal");
    let alice = user("alice");
    let bob = user("bob");

    let a = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    let b = engine
        .create_reservation(Some(&bob), Some("2023-03-16"), Some("11:00"), Some(60))
        .await
        .unwrap();
    engine
        .create_reservation(Some(&alice), Some("2023-03-01"), Some("10:00"), Some(60))
        .await
        .unwrap();

    let now = at("2023-03-16 12:00");
    assert_eq!(engine.list_owner_at(Some(&alice), now).await.unwrap(), vec![a]);
    assert_eq!(engine.list_owner_at(Some(&bob), now).await.unwrap(), vec![b]);
    assert_eq!(engine.reservation_count().await, 2);
    assert!(matches!(
        engine.list_owner_at(None, now).await,
        Err(EngineError::Unauthenticated)
    ));
}

#[tokio::test]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let (engine, _) = new_engine("concurrent.wal");
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..32 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let who = user(&format!("user{i}"));
            let minute = format!("10:{:02}", i % 30);
            eng.create_reservation(Some(&who), Some("2023-03-16"), Some(minute.as_str()), Some(45))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::SlotConflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.reservation_count().await, 1);
}

#[tokio::test]
async fn concurrent_disjoint_creates_all_commit() {
    let (engine, path) = new_engine("disjoint_creates.wal");
    let engine = Arc::new(engine);

    let n = 24;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let time = format!("{i:02}:00");
            eng.create_reservation(Some(&user("alice")), Some("2023-03-16"), Some(time.as_str()), Some(60))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.reservation_count().await, n);

    let engine2 = Engine::new(path, retention()).unwrap();
    assert_eq!(engine2.reservation_count().await, n);
}

#[tokio::test]
async fn replay_restores_records_in_order() {
    let path = test_wal_path("replay.wal");
    let alice = user("alice");
    let bob = user("bob");

    let before = {
        let engine = Engine::new(path.clone(), retention()).unwrap();
        engine
            .create_reservation(Some(&alice), Some("2023-03-17"), Some("09:00"), Some(30))
            .await
            .unwrap();
        let doomed = engine
            .create_reservation(Some(&bob), Some("2023-03-16"), Some("09:00"), Some(30))
            .await
            .unwrap();
        engine
            .create_reservation(Some(&bob), Some("2023-03-15"), Some("09:00"), Some(30))
            .await
            .unwrap();
        engine.cancel_reservation(Some(&bob), doomed.id).await.unwrap();
        engine.list_active_at(at("2023-03-17 12:00")).await.unwrap()
    };
    assert_eq!(before.len(), 2);

    let engine = Engine::new(path, retention()).unwrap();
    let after = engine.list_active_at(at("2023-03-17 12:00")).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn replay_applies_retention_sweeps() {
    let path = test_wal_path("replay_sweep.wal");
    let alice = user("alice");

    {
        let engine = Engine::new(path.clone(), retention()).unwrap();
        engine
            .create_reservation(Some(&alice), Some("2023-03-01"), Some("10:00"), Some(60))
            .await
            .unwrap();
        engine
            .create_reservation(Some(&alice), Some("2023-03-10"), Some("10:00"), Some(60))
            .await
            .unwrap();
        assert_eq!(engine.sweep_expired(at("2023-03-12 00:00")).await.unwrap(), 1);
    }

    let engine = Engine::new(path, retention()).unwrap();
    assert_eq!(engine.reservation_count().await, 1);
}

// ── WAL compaction tests ─────────────────────────────────

#[tokio::test]
async fn compact_wal_preserves_state() {
    let (engine, path) = new_engine("compact_state.wal");
    let alice = user("alice");

    // Churn: create and cancel the same slot repeatedly.
    for _ in 0..10 {
        let tmp = engine
            .create_reservation(Some(&alice), Some("2023-03-16"), Some("08:00"), Some(30))
            .await
            .unwrap();
        engine.cancel_reservation(Some(&alice), tmp.id).await.unwrap();
    }
    engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    engine
        .create_reservation(Some(&user("bob")), Some("2023-03-16"), Some("11:00"), Some(60))
        .await
        .unwrap();

    let now = at("2023-03-16 12:00");
    let before = engine.list_active_at(now).await.unwrap();
    let size_before = std::fs::metadata(&path).unwrap().len();

    engine.compact_wal().await.unwrap();

    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after < size_before, "compacted WAL ({size_after}) should be smaller than original ({size_before})");
    assert_eq!(engine.list_active_at(now).await.unwrap(), before);
}

#[tokio::test]
async fn compact_wal_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let alice = user("alice");
    let now = at("2023-03-16 23:00");

    let before = {
        let engine = Engine::new(path.clone(), retention()).unwrap();
        engine
            .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
            .await
            .unwrap();
        engine
            .create_reservation(Some(&alice), Some("2023-03-16"), Some("07:00"), Some(60))
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();

        // Appended after the rewrite.
        engine
            .create_reservation(Some(&alice), Some("2023-03-16"), Some("13:00"), Some(60))
            .await
            .unwrap();
        engine.list_active_at(now).await.unwrap()
    };

    let engine = Engine::new(path, retention()).unwrap();
    assert_eq!(engine.list_active_at(now).await.unwrap(), before);
}

#[tokio::test]
async fn compact_resets_append_counter() {
    let (engine, _) = new_engine("compact_counter.wal");
    let alice = user("alice");

    assert_eq!(engine.wal_appends_since_compact().await, 0);
    let r = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    engine.cancel_reservation(Some(&alice), r.id).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 2);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn rejected_operations_do_not_touch_the_log() {
    let (engine, _) = new_engine("rejected_no_log.wal");
    let alice = user("alice");
    let bob = user("bob");

    let r = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap();
    let _ = engine
        .create_reservation(Some(&bob), Some("2023-03-16"), Some("10:30"), Some(60))
        .await;
    let _ = engine.cancel_reservation(Some(&bob), r.id).await;

    assert_eq!(engine.wal_appends_since_compact().await, 1);
}

#[tokio::test]
async fn stopped_wal_writer_surfaces_as_storage_error() {
    let (wal_tx, wal_rx) = mpsc::channel(1);
    drop(wal_rx);
    let engine = Engine {
        store: RwLock::new(InMemoryStore::new()),
        wal_tx,
        retention: retention(),
    };
    let alice = user("alice");

    assert_eq!(engine.wal_appends_since_compact().await, 0);
    let err = engine
        .create_reservation(Some(&alice), Some("2023-03-16"), Some("10:00"), Some(60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
    assert_eq!(engine.reservation_count().await, 0);
}
