//! End-to-end group membership and isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridswarm::{ClientError, SwarmClient};
use gridswarm_core::MemoryBus;
use serde_json::json;

async fn client(bus: &MemoryBus, identity: &str) -> SwarmClient {
    SwarmClient::builder(identity)
        .bus(bus.clone())
        .connect()
        .await
        .expect("connect")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn counting_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&gridswarm::Meta, &serde_json::Value) {
    let counter = Arc::clone(counter);
    move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn s6_group_broadcast_stays_inside_the_group() {
    let bus = MemoryBus::new();
    let a = client(&bus, "a").await;
    let b = client(&bus, "b").await;
    let c = client(&bus, "c").await;

    a.join_group("g1").await.expect("join");
    b.join_group("g1").await.expect("join");
    c.join_group("g2").await.expect("join");

    let a_hits = Arc::new(AtomicUsize::new(0));
    let b_hits = Arc::new(AtomicUsize::new(0));
    let c_hits = Arc::new(AtomicUsize::new(0));
    a.on_group("x", counting_handler(&a_hits));
    b.on_group("x", counting_handler(&b_hits));
    c.on_group("x", counting_handler(&c_hits));

    a.group_broadcast("x", json!({})).await.expect("broadcast");
    settle().await;

    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    assert_eq!(c_hits.load(Ordering::SeqCst), 0);
    // The sender's own group handler must not fire.
    assert_eq!(a_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn joining_a_new_group_silences_the_old_channel() {
    let bus = MemoryBus::new();
    let mover = client(&bus, "mover").await;
    let g1_peer = client(&bus, "g1-peer").await;
    let g2_peer = client(&bus, "g2-peer").await;

    g1_peer.join_group("g1").await.expect("join");
    g2_peer.join_group("g2").await.expect("join");

    let hits = Arc::new(AtomicUsize::new(0));
    mover.on_group("x", counting_handler(&hits));

    mover.join_group("g1").await.expect("join g1");
    assert_eq!(mover.current_group().as_deref(), Some("g1"));

    mover.join_group("g2").await.expect("switch to g2");
    assert_eq!(mover.current_group().as_deref(), Some("g2"));

    // Traffic on the old group no longer reaches the mover...
    g1_peer.group_broadcast("x", json!({})).await.expect("g1 send");
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // ...but the new group does.
    g2_peer.group_broadcast("x", json!({})).await.expect("g2 send");
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rejoining_the_same_group_is_a_no_op() {
    let bus = MemoryBus::new();
    let a = client(&bus, "a").await;

    a.join_group("g1").await.expect("join");
    let subs_after_first = bus.subscription_count();
    a.join_group("g1").await.expect("rejoin");

    assert_eq!(bus.subscription_count(), subs_after_first);
    assert!(a.in_group());
}

#[tokio::test(start_paused = true)]
async fn group_broadcast_without_membership_fails() {
    let bus = MemoryBus::new();
    let a = client(&bus, "a").await;

    assert!(!a.in_group());
    assert_eq!(a.current_group(), None);

    let err = a
        .group_broadcast("x", json!({}))
        .await
        .expect_err("must fail");
    assert!(matches!(err, ClientError::NotInGroup));
}

#[tokio::test(start_paused = true)]
async fn leave_group_is_idempotent() {
    let bus = MemoryBus::new();
    let a = client(&bus, "a").await;

    a.leave_group().await.expect("leave of nothing");
    a.join_group("g1").await.expect("join");
    a.leave_group().await.expect("leave");
    a.leave_group().await.expect("second leave");

    assert!(!a.in_group());
    let err = a
        .group_broadcast("x", json!({}))
        .await
        .expect_err("must fail");
    assert!(matches!(err, ClientError::NotInGroup));
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_the_active_group() {
    let bus = MemoryBus::new();
    let a = client(&bus, "a").await;

    a.join_group("g1").await.expect("join");
    // Base subscriptions (2) plus the group channel.
    assert_eq!(bus.subscription_count(), 3);

    a.shutdown().await;
    assert_eq!(bus.subscription_count(), 0);
}
