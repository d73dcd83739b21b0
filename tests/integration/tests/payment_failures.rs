//! Integration tests: failure propagation, timeouts, and concurrent
//! forwards across a three-node network.

use std::time::Duration;

use opcn_channel::HtlcOutcome;
use opcn_core::{ChannelId, Preimage};
use opcn_node::{Node, NodeConfig};
use opcn_switch::{HtlcRole, PaymentError};

const CHANNEL_CAPACITY: u64 = 100_000;

async fn wait_announced(node: &Node, id: ChannelId) {
    tokio::time::timeout(Duration::from_secs(5), node.await_channel_announced(id))
        .await
        .expect("channel announcement must converge before the timeout");
}

fn start_node(config: NodeConfig) -> Node {
    let node = Node::new(config).expect("node creation");
    node.start();
    node
}

/// Alice–Bob–Carol with both channels open and announced everywhere.
/// `start_carol` controls whether Carol's message loop runs.
async fn three_nodes(
    alice_config: NodeConfig,
    start_carol: bool,
) -> (Node, Node, Node, ChannelId, ChannelId) {
    let alice = start_node(alice_config);
    let bob = start_node(NodeConfig::with_id("bob"));
    let carol = Node::new(NodeConfig::with_id("carol")).expect("node creation");
    if start_carol {
        carol.start();
    }

    alice.connect(&bob);
    bob.connect(&carol);

    let chan_ab = alice
        .open_channel(bob.id(), CHANNEL_CAPACITY)
        .await
        .expect("open alice-bob");
    let chan_bc = bob
        .open_channel(carol.id(), CHANNEL_CAPACITY)
        .await
        .expect("open bob-carol");

    wait_announced(&alice, chan_ab).await;
    wait_announced(&alice, chan_bc).await;
    wait_announced(&bob, chan_ab).await;
    wait_announced(&bob, chan_bc).await;
    if start_carol {
        wait_announced(&carol, chan_ab).await;
        wait_announced(&carol, chan_bc).await;
    }

    (alice, bob, carol, chan_ab, chan_bc)
}

#[tokio::test]
async fn test_unknown_invoice_fails_backward_hop_by_hop() {
    let (alice, bob, carol, chan_ab, chan_bc) =
        three_nodes(NodeConfig::with_id("alice"), true).await;

    let mut alice_events = alice.subscribe_htlc_events();
    let mut bob_events = bob.subscribe_htlc_events();
    let mut carol_events = carol.subscribe_htlc_events();

    // Carol never issued an invoice for this hash.
    let bogus = Preimage::generate().payment_hash();
    let result = alice.pay(carol.id(), bogus, 100).await;
    match result {
        Err(PaymentError::RouteFailure { origin, reason }) => {
            assert_eq!(&origin, carol.id(), "failure originates at the terminal hop");
            assert!(reason.contains("unknown payment hash"));
        }
        other => panic!("expected RouteFailure, got {:?}", other.map(|_| ())),
    }

    // Every channel fully refunded on both views.
    for (node, channel) in [
        (&alice, chan_ab),
        (&bob, chan_ab),
        (&bob, chan_bc),
        (&carol, chan_bc),
    ] {
        let balances = node.channel_balances(&channel).unwrap();
        assert_eq!(balances.pending_count, 0);
        assert_eq!(
            balances.local_balance + balances.remote_balance,
            CHANNEL_CAPACITY
        );
    }
    let alice_ab = alice.channel_balances(&chan_ab).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY);

    // Each node classified the failed resolution with its own role.
    let send = tokio::time::timeout(Duration::from_secs(5), alice_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(send.role, HtlcRole::Send);
    assert_eq!(send.outcome, HtlcOutcome::Failure);

    let forward = tokio::time::timeout(Duration::from_secs(5), bob_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forward.role, HtlcRole::Forward);
    assert_eq!(forward.outcome, HtlcOutcome::Failure);

    let receive = tokio::time::timeout(Duration::from_secs(5), carol_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receive.role, HtlcRole::Receive);
    assert_eq!(receive.outcome, HtlcOutcome::Failure);
}

#[tokio::test]
async fn test_timeout_surfaces_once_without_rollback() {
    // Carol's loop never runs: Bob's forward to her is never answered.
    let mut alice_config = NodeConfig::with_id("alice");
    alice_config.payments.timeout_secs = 1;
    let (alice, bob, carol, chan_ab, chan_bc) = three_nodes(alice_config, false).await;

    let hash = Preimage::generate().payment_hash();
    let result = alice.pay(carol.id(), hash, 100).await;
    assert!(matches!(result, Err(PaymentError::Timeout(_))));

    // No forced rollback: the first-hop HTLC is still outstanding on
    // Alice's view, and Bob holds both legs pending.
    let alice_ab = alice.channel_balances(&chan_ab).unwrap();
    assert_eq!(alice_ab.pending_total, 100);
    let bob_ab = bob.channel_balances(&chan_ab).unwrap();
    assert_eq!(bob_ab.pending_total, 100);
    let bob_bc = bob.channel_balances(&chan_bc).unwrap();
    assert_eq!(bob_bc.pending_total, 100);

    // The hash is still in flight, so a retry is rejected rather than
    // double-paying.
    let retry = alice.pay(carol.id(), hash, 100).await;
    assert!(matches!(retry, Err(PaymentError::PaymentInFlight(_))));
}

#[tokio::test]
async fn test_insufficient_downstream_liquidity_fails_at_bob() {
    let (alice, bob, carol, chan_ab, chan_bc) =
        three_nodes(NodeConfig::with_id("alice"), true).await;

    // First payment drains most of Bob's B–C balance.
    let first = carol.add_invoice(60_000, "drain");
    alice
        .pay(carol.id(), first.payment_hash, 60_000)
        .await
        .expect("first payment settles");

    // Second payment of the same size cannot be forwarded.
    let second = carol.add_invoice(60_000, "too much");
    let result = alice.pay(carol.id(), second.payment_hash, 60_000).await;
    match result {
        Err(PaymentError::RouteFailure { origin, .. }) => {
            assert_eq!(&origin, bob.id(), "failure originates at the forwarding hop");
        }
        other => panic!("expected RouteFailure, got {:?}", other.map(|_| ())),
    }

    // First payment's effect retained, second fully refunded.
    let alice_ab = alice.channel_balances(&chan_ab).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY - 60_000);
    assert_eq!(alice_ab.pending_count, 0);
    let bob_bc = bob.channel_balances(&chan_bc).unwrap();
    assert_eq!(bob_bc.local_balance, CHANNEL_CAPACITY - 60_000);
    assert_eq!(bob_bc.pending_count, 0);
}

#[tokio::test]
async fn test_oversized_payment_rejected_at_origin() {
    let (alice, _bob, carol, chan_ab, _chan_bc) =
        three_nodes(NodeConfig::with_id("alice"), true).await;

    let invoice = carol.add_invoice(CHANNEL_CAPACITY + 1, "too big");
    let result = alice
        .pay(carol.id(), invoice.payment_hash, CHANNEL_CAPACITY + 1)
        .await;
    assert!(matches!(result, Err(PaymentError::Switch(_))));

    let alice_ab = alice.channel_balances(&chan_ab).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY);
    assert_eq!(alice_ab.pending_count, 0);
}

#[tokio::test]
async fn test_concurrent_opposite_direction_payments() {
    let (alice, bob, carol, chan_ab, chan_bc) =
        three_nodes(NodeConfig::with_id("alice"), true).await;

    // Give Carol spendable balance toward Bob first.
    let seed = carol.add_invoice(1_000, "seed liquidity");
    alice
        .pay(carol.id(), seed.payment_hash, 1_000)
        .await
        .expect("seed payment settles");

    // Opposite-direction payments through the same channel pair, at the
    // same time. Bob forwards A→C and C→A concurrently.
    let to_carol = carol.add_invoice(100, "a to c");
    let to_alice = alice.add_invoice(100, "c to a");
    let (a_result, c_result) = tokio::join!(
        alice.pay(carol.id(), to_carol.payment_hash, 100),
        carol.pay(alice.id(), to_alice.payment_hash, 100),
    );
    a_result.expect("alice's payment settles");
    c_result.expect("carol's payment settles");

    // The 100s cancel out; conservation holds on every view.
    for (node, channel) in [
        (&alice, chan_ab),
        (&bob, chan_ab),
        (&bob, chan_bc),
        (&carol, chan_bc),
    ] {
        let balances = node.channel_balances(&channel).unwrap();
        assert_eq!(balances.pending_count, 0);
        assert_eq!(
            balances.local_balance + balances.remote_balance,
            CHANNEL_CAPACITY
        );
    }
    let alice_ab = alice.channel_balances(&chan_ab).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY - 1_000);
    let carol_bc = carol.channel_balances(&chan_bc).unwrap();
    assert_eq!(carol_bc.local_balance, 1_000);
}
