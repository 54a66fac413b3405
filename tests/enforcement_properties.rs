//! Enforcement guarantees: pagination, protection, idempotence, failure
//! isolation, dry run and run exclusion.

use engine::lifecycle::{LoginError, SubjectLifecycle};
use chrono::TimeDelta;
use engine::memory::{MemoryStore, Snapshot};
use engine::model::{ContentType, SubjectId};
use engine::retention::{
    EnforcementAction, LocalRunLock, RetentionOrchestrator, RetentionPeriod, RetentionSettings,
    RolePolicy, RunError, RunLock, SETTINGS_KEY,
};
use engine::testing::{
    ContentBuilder, FlakyStore, RecordingObserver, SubjectBuilder, TestConfigBuilder, days_ago,
    fixed_now,
};
use std::sync::Arc;

fn disable_after_30_days() -> RetentionSettings {
    RetentionSettings {
        user_disable: RetentionPeriod::days(30),
        ..Default::default()
    }
}

async fn seed_inactive(store: &MemoryStore, ids: impl IntoIterator<Item = u64>) {
    for id in ids {
        store
            .insert_subject(SubjectBuilder::new(id).last_active(days_ago(100)).build())
            .await;
    }
}

#[tokio::test]
async fn test_pagination_visits_every_eligible_subject() {
    const PAGE: usize = 4;

    // (subjects, expected fetches) for N = 0, P, P+1. Each run also issues
    // one empty never-active query.
    for (count, expected_fetches) in [(0u64, 2usize), (PAGE as u64, 3), (PAGE as u64 + 1, 3)] {
        let store = Arc::new(MemoryStore::new());
        store.set_settings(disable_after_30_days()).await;
        seed_inactive(&store, 1..=count).await;

        let config = TestConfigBuilder::new()
            .batch_size("disable_users", PAGE)
            .build();
        let result = RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
            .run_at(fixed_now())
            .await
            .unwrap();

        assert_eq!(
            result.applied(EnforcementAction::DisableUsers),
            count as usize,
            "N={count}"
        );
        assert_eq!(store.subject_pages_fetched(), expected_fetches, "N={count}");
        for id in 1..=count {
            let record = store.subject_record(SubjectId(id)).await.unwrap();
            assert!(record.disabled_at.is_some(), "subject {id} skipped at N={count}");
        }
    }
}

#[tokio::test]
async fn test_delete_pagination_survives_shrinking_result_set() {
    const PAGE: usize = 4;
    let count = PAGE as u64 + 1;

    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            user_delete: RetentionPeriod::days(5),
            ..Default::default()
        })
        .await;
    for id in 1..=count {
        store
            .insert_subject(
                SubjectBuilder::new(id)
                    .last_active(days_ago(20))
                    .disabled(days_ago(10))
                    .build(),
            )
            .await;
    }

    let config = TestConfigBuilder::new()
        .batch_size("delete_users", PAGE)
        .build();
    let result = RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
        .run_at(fixed_now())
        .await
        .unwrap();

    // Each deleted page shrinks the eligible set; the keyset cursor still
    // reaches the last subject.
    assert_eq!(result.applied(EnforcementAction::DeleteUsers), count as usize);
    assert!(store.snapshot().await.subjects.is_empty());

    let delete = result.pass(EnforcementAction::DeleteUsers).unwrap();
    assert_eq!(delete.tally.pages_fetched, 2);
}

#[tokio::test]
async fn test_protected_subjects_are_never_mutated() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            user_delete: RetentionPeriod::days(1),
            ..Default::default()
        })
        .await;

    for id in 1..=10 {
        let mut builder = SubjectBuilder::new(id).last_active(days_ago(100));
        if id % 3 == 0 {
            builder = builder.protected().disabled(days_ago(50));
        }
        store.insert_subject(builder.build()).await;
    }

    let config = TestConfigBuilder::new().uniform_batch_size(2).build();
    let result = RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
        .run_at(fixed_now())
        .await
        .unwrap();

    assert_eq!(result.applied(EnforcementAction::DisableUsers), 7);
    assert_eq!(result.applied(EnforcementAction::DeleteUsers), 0);
    for id in [3, 6, 9] {
        let record = store.subject_record(SubjectId(id)).await.unwrap();
        assert_eq!(record.disabled_at, Some(days_ago(50)), "protected {id} touched");
    }
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            user_delete: RetentionPeriod::days(5),
            post_archive: RetentionPeriod::years(1),
            ..Default::default()
        })
        .await;
    seed_inactive(&store, 1..=5).await;
    store
        .insert_subject(SubjectBuilder::new(6).disabled(days_ago(10)).build())
        .await;
    store
        .insert_content(ContentBuilder::post(1).published(days_ago(400)).build())
        .await;

    let orchestrator = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        TestConfigBuilder::new().build(),
    );

    let first = orchestrator.run_at(fixed_now()).await.unwrap();
    assert_eq!(first.applied(EnforcementAction::DisableUsers), 5);
    assert_eq!(first.applied(EnforcementAction::DeleteUsers), 1);
    let after_first = store.snapshot().await;

    let observer = Arc::new(RecordingObserver::new());
    let orchestrator = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .with_observer(observer.clone());
    let second = orchestrator.run_at(fixed_now()).await.unwrap();

    assert!(second.passes.iter().all(|pass| pass.tally.applied == 0));
    assert!(observer.events().is_empty());
    assert_eq!(store.snapshot().await, after_first);
}

#[tokio::test]
async fn test_override_and_default_partitions_never_overlap() {
    let store = Arc::new(MemoryStore::new());
    store.set_groups(["author", "editor", "subscriber"]).await;

    let mut settings = RetentionSettings {
        user_disable: RetentionPeriod::days(30),
        ..Default::default()
    };
    for group in ["author", "editor"] {
        settings.role_policies.insert(
            group.to_string(),
            RolePolicy {
                user_disable: RetentionPeriod::days(10),
                user_delete: RetentionPeriod::DISABLED,
            },
        );
    }
    store.set_settings(settings).await;

    let groups: [&[&str]; 3] = [&["editor"], &["author"], &["subscriber"]];
    for id in 1..=9u64 {
        store
            .insert_subject(
                SubjectBuilder::new(id)
                    .groups(groups[(id % 3) as usize])
                    .last_active(days_ago(60))
                    .build(),
            )
            .await;
    }

    let observer = Arc::new(RecordingObserver::new());
    let config = TestConfigBuilder::new().batch_size("disable_users", 2).build();
    let result = RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
        .with_observer(observer.clone())
        .run_at(fixed_now())
        .await
        .unwrap();

    assert_eq!(result.applied(EnforcementAction::DisableUsers), 9);

    // Exactly one event per subject: no partition saw a subject twice.
    let mut targets: Vec<String> = observer
        .events()
        .iter()
        .map(|event| event.target.to_string())
        .collect();
    targets.sort();
    targets.dedup();
    assert_eq!(targets.len(), 9);
    assert_eq!(observer.events().len(), 9);
}

#[tokio::test]
async fn test_failing_post_pass_does_not_stop_other_passes() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            post_archive: RetentionPeriod::days(30),
            page_archive: RetentionPeriod::days(30),
            ..Default::default()
        })
        .await;
    seed_inactive(&store, 1..=3).await;
    store
        .insert_content(ContentBuilder::post(1).published(days_ago(90)).build())
        .await;
    store
        .insert_content(ContentBuilder::page(2).published(days_ago(90)).build())
        .await;

    let flaky = Arc::new(FlakyStore::new(store.clone()).failing_content_queries(ContentType::Post));
    let result = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        flaky,
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    let failed: Vec<_> = result.failed_passes().map(|pass| pass.action).collect();
    assert_eq!(failed, vec![EnforcementAction::ArchiveContent(ContentType::Post)]);
    assert_eq!(result.applied(EnforcementAction::DisableUsers), 3);
    assert_eq!(
        result.applied(EnforcementAction::ArchiveContent(ContentType::Page)),
        1
    );
}

#[tokio::test]
async fn test_vanished_subject_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    store.set_settings(disable_after_30_days()).await;
    seed_inactive(&store, 1..=3).await;

    let flaky = Arc::new(FlakyStore::new(store.clone()).vanishing_subject(SubjectId(2)));
    let result = RetentionOrchestrator::new(
        store.clone(),
        flaky,
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    let pass = result.pass(EnforcementAction::DisableUsers).unwrap();
    assert!(pass.succeeded());
    assert_eq!(pass.tally.applied, 2);
    assert_eq!(pass.tally.records_skipped, 1);
    assert!(store.subject_record(SubjectId(2)).await.is_none());
    assert!(store.subject_record(SubjectId(3)).await.unwrap().disabled_at.is_some());
}

#[tokio::test]
async fn test_rejected_mutation_skips_only_that_subject() {
    let store = Arc::new(MemoryStore::new());
    store.set_settings(disable_after_30_days()).await;
    seed_inactive(&store, 1..=3).await;

    let flaky = Arc::new(FlakyStore::new(store.clone()).rejecting_subject(SubjectId(1)));
    let result = RetentionOrchestrator::new(
        store.clone(),
        flaky,
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    assert_eq!(result.applied(EnforcementAction::DisableUsers), 2);
    assert!(store.subject_record(SubjectId(1)).await.unwrap().disabled_at.is_none());
}

#[tokio::test]
async fn test_unavailable_store_fails_user_passes_only() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            page_archive: RetentionPeriod::days(30),
            ..Default::default()
        })
        .await;
    seed_inactive(&store, 1..=3).await;
    store
        .insert_content(ContentBuilder::page(1).published(days_ago(90)).build())
        .await;

    let flaky = Arc::new(FlakyStore::new(store.clone()).unavailable_subject_mutations());
    let result = RetentionOrchestrator::new(
        store.clone(),
        flaky,
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    let disable = result.pass(EnforcementAction::DisableUsers).unwrap();
    assert!(!disable.succeeded());
    assert_eq!(disable.tally.applied, 0);
    assert!(result.pass(EnforcementAction::DeleteUsers).unwrap().succeeded());
    assert_eq!(
        result.applied(EnforcementAction::ArchiveContent(ContentType::Page)),
        1
    );
}

#[tokio::test]
async fn test_group_lookup_failure_fails_user_passes_only() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            post_archive: RetentionPeriod::days(30),
            ..Default::default()
        })
        .await;
    seed_inactive(&store, 1..=2).await;
    store
        .insert_content(ContentBuilder::post(1).published(days_ago(90)).build())
        .await;

    let flaky = Arc::new(FlakyStore::new(store.clone()).failing_groups());
    let result = RetentionOrchestrator::new(
        store.clone(),
        flaky,
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    assert_eq!(result.failed_passes().count(), 2);
    assert_eq!(
        result.applied(EnforcementAction::ArchiveContent(ContentType::Post)),
        1
    );
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_settings(RetentionSettings {
            user_disable: RetentionPeriod::days(30),
            user_delete: RetentionPeriod::days(5),
            post_archive: RetentionPeriod::days(30),
            ..Default::default()
        })
        .await;
    seed_inactive(&store, 1..=3).await;
    store
        .insert_subject(SubjectBuilder::new(4).disabled(days_ago(10)).build())
        .await;
    store
        .insert_content(ContentBuilder::post(1).published(days_ago(90)).build())
        .await;
    let before = store.snapshot().await;

    let observer = Arc::new(RecordingObserver::new());
    let config = TestConfigBuilder::new().uniform_batch_size(2).dry_run().build();
    let result = RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
        .with_observer(observer.clone())
        .run_at(fixed_now())
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.applied(EnforcementAction::DisableUsers), 3);
    assert_eq!(result.applied(EnforcementAction::DeleteUsers), 1);
    assert_eq!(
        result.applied(EnforcementAction::ArchiveContent(ContentType::Post)),
        1
    );
    assert_eq!(store.snapshot().await, before);
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(LocalRunLock::new());
    let config = TestConfigBuilder::new().build();
    let stale_after = TimeDelta::from_std(config.run_lock_timeout).unwrap();

    let held = lock
        .try_acquire(fixed_now(), stale_after)
        .await
        .unwrap()
        .unwrap();

    let orchestrator =
        RetentionOrchestrator::new(store.clone(), store.clone(), store.clone(), config)
            .with_run_lock(lock.clone());

    let err = orchestrator.run_at(fixed_now()).await.unwrap_err();
    assert!(matches!(err, RunError::AlreadyRunning));

    lock.release(&held).await.unwrap();
    assert!(orchestrator.run_at(fixed_now()).await.is_ok());
}

#[tokio::test]
async fn test_reenabled_subject_can_log_in_and_stays_active() {
    let store = Arc::new(MemoryStore::new());
    store.set_settings(disable_after_30_days()).await;
    seed_inactive(&store, [1]).await;

    let orchestrator = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        TestConfigBuilder::new().build(),
    );
    let lifecycle = SubjectLifecycle::new(store.clone(), store.clone(), store.clone());

    orchestrator.run_at(fixed_now()).await.unwrap();
    let err = lifecycle.check_login(SubjectId(1)).await.unwrap_err();
    assert!(matches!(err, LoginError::AccountDisabled(_)));

    lifecycle.reenable(SubjectId(1)).await.unwrap();
    lifecycle.check_login(SubjectId(1)).await.unwrap();
    lifecycle
        .record_login(SubjectId(1), fixed_now())
        .await
        .unwrap();

    let result = orchestrator.run_at(fixed_now()).await.unwrap();
    assert_eq!(result.applied(EnforcementAction::DisableUsers), 0);
    assert!(store.subject_record(SubjectId(1)).await.unwrap().disabled_at.is_none());
}

#[tokio::test]
async fn test_store_backed_lock_excludes_runs_sharing_a_snapshot() {
    let origin = Arc::new(MemoryStore::new());
    origin.set_settings(disable_after_30_days()).await;
    seed_inactive(&origin, 1..=3).await;

    // Another process holds the lock recorded in the shared snapshot.
    let stale_after = TimeDelta::hours(6);
    origin
        .try_acquire(fixed_now(), stale_after)
        .await
        .unwrap()
        .unwrap();
    let store = Arc::new(MemoryStore::from_snapshot(origin.snapshot().await));

    let orchestrator = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .with_run_lock(store.clone());

    let err = orchestrator
        .run_at(fixed_now() + TimeDelta::hours(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::AlreadyRunning));
    assert!(
        store
            .subject_record(SubjectId(1))
            .await
            .unwrap()
            .disabled_at
            .is_none()
    );

    // Past the stale timeout the lock is taken over and released after the run.
    let result = orchestrator
        .run_at(fixed_now() + TimeDelta::hours(7))
        .await
        .unwrap();
    assert_eq!(result.applied(EnforcementAction::DisableUsers), 3);
    assert!(store.run_lock_holder().await.is_none());

    // A second orchestrator over the released snapshot can run again.
    let next = Arc::new(MemoryStore::from_snapshot(store.snapshot().await));
    let rerun = RetentionOrchestrator::new(
        next.clone(),
        next.clone(),
        next.clone(),
        TestConfigBuilder::new().build(),
    )
    .with_run_lock(next.clone())
    .run_at(fixed_now() + TimeDelta::hours(8))
    .await;
    assert!(rerun.is_ok());
}

#[tokio::test]
async fn test_malformed_unit_falls_back_to_days() {
    let mut snapshot = Snapshot {
        subjects: vec![SubjectBuilder::new(1).last_active(days_ago(31)).build()],
        ..Default::default()
    };
    snapshot.options.insert(
        SETTINGS_KEY.to_string(),
        serde_json::json!({
            "user_disable": {"quantity": 30, "unit": null},
            "user_delete": null
        }),
    );
    let store = Arc::new(MemoryStore::from_snapshot(snapshot));

    let result = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        TestConfigBuilder::new().build(),
    )
    .run_at(fixed_now())
    .await
    .unwrap();

    assert_eq!(result.applied(EnforcementAction::DisableUsers), 1);
    let record = store.subject_record(SubjectId(1)).await.unwrap();
    assert_eq!(record.disabled_at, Some(fixed_now()));
}
