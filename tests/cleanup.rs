mod support;

use uuid::Uuid;
use wishlist_core::models::{HolderCredential, PublicStatus, ReservationStatus, ReserverIdentity};
use wishlist_core::notifier::NotificationEvent;
use wishlist_core::registry::cleanup::ACCOUNT_DELETED_REASON;
use wishlist_core::AppError;

async fn count(ctx: &support::TestContext, sql: &str, owner: Uuid) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql)
        .bind(owner)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    n
}

#[tokio::test]
async fn cascade_removes_everything_the_owner_has() {
    let Some(ctx) = support::setup().await else { return };
    let owner = Uuid::new_v4();
    let list_a = support::wishlist(&ctx, owner, "A").await;
    let list_b = support::wishlist(&ctx, owner, "B").await;
    let shared = support::item(&ctx, owner, "Shared").await;
    let guest_held = support::item(&ctx, owner, "Guest held").await;
    let canceled = support::item(&ctx, owner, "Canceled").await;
    let idle = support::item(&ctx, owner, "Idle").await;

    let attachments = &ctx.registry.attachments;
    attachments.attach_item(list_a.id, shared.id, owner).await.unwrap();
    attachments.attach_item(list_b.id, shared.id, owner).await.unwrap();
    attachments.attach_item(list_a.id, guest_held.id, owner).await.unwrap();

    let reservations = &ctx.registry.reservations;
    reservations
        .create_reservation(shared.id, ReserverIdentity::User(Uuid::new_v4()), None)
        .await
        .unwrap();
    reservations
        .create_reservation(guest_held.id, ReserverIdentity::guest("Eve", "eve@x.com"), None)
        .await
        .unwrap();
    let friend = Uuid::new_v4();
    reservations
        .create_reservation(canceled.id, ReserverIdentity::User(friend), None)
        .await
        .unwrap();
    reservations
        .cancel_reservation(canceled.id, HolderCredential::User(friend), None)
        .await
        .unwrap();

    let report = ctx.registry.cleanup.cascade_delete_owner(owner).await.unwrap();
    assert_eq!(report.owner_id, owner);
    assert_eq!(report.items_deleted, 4);
    assert_eq!(report.wishlists_deleted, 2);
    assert_eq!(report.attachments_deleted, 3);
    assert_eq!(report.reservations_deleted, 3);
    assert_eq!(report.reservations_invalidated, 2);
    assert_eq!(report.held_reservations_canceled, 0);

    // Exactly one event per reservation that was active.
    assert_eq!(ctx.notifier.count("reservation-invalidated"), 2);

    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM items WHERE owner_id = $1", owner).await, 0);
    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM wishlists WHERE owner_id = $1", owner).await, 0);
    for id in [shared.id, guest_held.id, canceled.id, idle.id] {
        assert_eq!(
            count(&ctx, "SELECT COUNT(*) FROM reservations WHERE item_id = $1", id).await,
            0
        );
        assert_eq!(
            count(&ctx, "SELECT COUNT(*) FROM wishlist_items WHERE item_id = $1", id).await,
            0
        );
        assert!(matches!(
            reservations.get_reservation_status(id).await,
            Err(AppError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn cascade_releases_reservations_held_by_deleted_user() {
    let Some(ctx) = support::setup().await else { return };
    let leaving = Uuid::new_v4();
    let other_owner = Uuid::new_v4();
    let gift = support::item(&ctx, other_owner, "Bike").await;

    ctx.registry
        .reservations
        .create_reservation(gift.id, ReserverIdentity::User(leaving), None)
        .await
        .unwrap();

    let report = ctx.registry.cleanup.cascade_delete_owner(leaving).await.unwrap();
    assert_eq!(report.items_deleted, 0);
    assert_eq!(report.reservations_invalidated, 0);
    assert_eq!(report.held_reservations_canceled, 1);

    assert_eq!(
        ctx.registry.reservations.get_reservation_status(gift.id).await.unwrap(),
        PublicStatus::Available
    );
    let canceled = ctx
        .notifier
        .events()
        .into_iter()
        .find(|e| e.kind() == "reservation-canceled")
        .expect("cancellation event");
    match canceled {
        NotificationEvent::ReservationCanceled { item_id, reason, .. } => {
            assert_eq!(item_id, gift.id);
            assert_eq!(reason.as_deref(), Some(ACCOUNT_DELETED_REASON));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM reservations WHERE item_id = $1")
            .bind(gift.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(status, ReservationStatus::Canceled.as_str());
}

#[tokio::test]
async fn cascade_for_unknown_owner_is_empty() {
    let Some(ctx) = support::setup().await else { return };
    let report = ctx.registry.cleanup.cascade_delete_owner(Uuid::new_v4()).await.unwrap();
    assert_eq!(report.items_deleted, 0);
    assert_eq!(report.wishlists_deleted, 0);
    assert!(ctx.notifier.events().is_empty());
}
