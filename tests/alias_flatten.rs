//! ALIAS flattening against the storage-backed central layer.
//!
//! Every test goes through [`RecordingCentral`] so the number of
//! authoritative calls made by the reconciler can be asserted alongside the
//! resulting mirror.

mod common;

use common::*;
use zone_manager::metrics::FlattenAction;
use zone_manager::model::{RecordSetCriterion, RecordType, Visibility};
use zone_manager::{CentralApi, CentralError, Error, RequestContext, ResolveFailure};

// ============================================================================
// Create and refresh
// ============================================================================

#[tokio::test]
async fn first_flatten_creates_hidden_mirror() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;

    let action = h
        .flattener
        .flatten(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();
    assert_eq!(action, FlattenAction::Created);

    let mirror = h.mirror(&zone).await.expect("mirror should exist");
    assert_eq!(mirror.name, ZONE_NAME);
    assert_eq!(mirror.ttl, Some(3600));
    assert_eq!(mirror.visible, Visibility::Mdns);
    assert_addresses(&mirror, &["192.0.2.1"]);

    let record = &mirror.records[0];
    assert!(record.managed);
    assert_eq!(record.managed_resource_type.as_deref(), Some("ALIAS"));
    assert_eq!(record.managed_resource_id, Some(alias.records[0].id));
}

#[tokio::test]
async fn flattening_twice_is_idempotent() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1", "192.0.2.2"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    let ctx = RequestContext::new();

    let first = h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();
    let after_first = h.mirror(&zone).await.unwrap();
    let second = h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();
    let after_second = h.mirror(&zone).await.unwrap();

    assert_eq!(first, FlattenAction::Created);
    assert_eq!(second, FlattenAction::Updated);
    assert_eq!(after_first.id, after_second.id);
    assert_addresses(&after_second, &["192.0.2.1", "192.0.2.2"]);

    let mirrors = h
        .authority
        .find_recordsets(
            &ctx,
            &RecordSetCriterion::for_zone(zone.id).with_type(RecordType::A),
        )
        .await
        .unwrap();
    assert_eq!(mirrors.len(), 1);
    assert_eq!(h.central.count("create_recordset"), 1);
    assert_eq!(h.central.count("update_recordset"), 1);
}

#[tokio::test]
async fn changed_resolution_replaces_the_whole_set() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["1.1.1.1", "1.1.1.2"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    let ctx = RequestContext::new();

    h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();
    assert_addresses(&h.mirror(&zone).await.unwrap(), &["1.1.1.1", "1.1.1.2"]);

    h.resolver.set(TARGET, &ips(&["1.1.1.3"]));
    h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();
    assert_addresses(&h.mirror(&zone).await.unwrap(), &["1.1.1.3"]);
}

#[tokio::test]
async fn every_target_lands_in_one_write() {
    let h = Harness::new();
    h.resolver.set("a.example.net.", &ips(&["198.51.100.1"]));
    h.resolver.set("b.example.net.", &ips(&["198.51.100.2", "198.51.100.3"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &["a.example.net.", "b.example.net."]).await;

    h.flattener
        .flatten(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();

    assert_addresses(
        &h.mirror(&zone).await.unwrap(),
        &["198.51.100.1", "198.51.100.2", "198.51.100.3"],
    );
    assert_eq!(h.central.count("create_recordset"), 1);
    assert_eq!(h.central.count("update_recordset"), 0);
}

#[tokio::test]
async fn flatten_bumps_zone_serial_and_flags_notify() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    let ctx = RequestContext::new();
    let before = h.authority.get_zone(&ctx, zone.id).await.unwrap();

    h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();

    let after = h.authority.get_zone(&ctx, zone.id).await.unwrap();
    assert!(after.serial > before.serial);
    assert!(after.delayed_notify);
}

// ============================================================================
// Resolution failures
// ============================================================================

#[tokio::test]
async fn unknown_target_publishes_empty_mirror() {
    let h = Harness::new();
    h.resolver
        .fail(TARGET, ResolveFailure::NotFound(TARGET.to_string()));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;

    let action = h
        .flattener
        .flatten(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();

    assert_eq!(action, FlattenAction::Created);
    assert!(h.mirror(&zone).await.unwrap().records.is_empty());
}

#[tokio::test]
async fn resolver_outage_empties_existing_mirror() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    let ctx = RequestContext::new();
    h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();

    h.resolver
        .fail(TARGET, ResolveFailure::Transport("timed out".to_string()));
    let action = h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();

    assert_eq!(action, FlattenAction::Updated);
    assert!(h.mirror(&zone).await.unwrap().records.is_empty());
}

#[tokio::test]
async fn one_failing_target_keeps_the_others() {
    let h = Harness::new();
    h.resolver.set("up.example.net.", &ips(&["203.0.113.5"]));
    h.resolver.fail(
        "down.example.net.",
        ResolveFailure::NotFound("down.example.net.".to_string()),
    );
    let zone = h.zone(ZONE_NAME).await;
    let alias = h
        .alias(&zone, &["down.example.net.", "up.example.net."])
        .await;

    h.flattener
        .flatten(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();

    assert_addresses(&h.mirror(&zone).await.unwrap(), &["203.0.113.5"]);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn delete_removes_the_mirror() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    let ctx = RequestContext::new();
    h.flattener.flatten(&ctx, zone.id, &alias).await.unwrap();

    let action = h.flattener.delete(&ctx, zone.id, &alias).await.unwrap();

    assert_eq!(action, FlattenAction::Deleted);
    assert!(h.mirror(&zone).await.is_none());
    assert_eq!(h.central.count("delete_recordset"), 1);
}

#[tokio::test]
async fn delete_without_mirror_is_a_noop() {
    let h = Harness::new();
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;

    let action = h
        .flattener
        .delete(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();

    assert_eq!(action, FlattenAction::Noop);
    assert_eq!(h.central.count("delete_recordset"), 0);
}

// ============================================================================
// Managed record protection
// ============================================================================

#[tokio::test]
async fn mirror_is_protected_from_plain_callers() {
    let h = Harness::new();
    h.resolver.set(TARGET, &ips(&["192.0.2.1"]));
    let zone = h.zone(ZONE_NAME).await;
    let alias = h.alias(&zone, &[TARGET]).await;
    h.flattener
        .flatten(&RequestContext::new(), zone.id, &alias)
        .await
        .unwrap();
    let mirror = h.mirror(&zone).await.unwrap();

    let err = h
        .authority
        .delete_recordset(&RequestContext::new(), zone.id, mirror.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Central(CentralError::ManagedRecord(id)) if id == mirror.id
    ));

    h.authority
        .delete_recordset(&RequestContext::managed(), zone.id, mirror.id)
        .await
        .unwrap();
    assert!(h.mirror(&zone).await.is_none());
}
