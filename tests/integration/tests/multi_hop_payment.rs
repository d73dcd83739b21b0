//! Integration test: multi-hop HTLC payment across three nodes.
//!
//! Alice–Bob–Carol, both channels funded with 100000 units. Alice pays a
//! 100-unit invoice issued by Carol through Bob. Asserts the per-channel
//! balance shifts on every node's view and that exactly one Send, one
//! Forward, and one Receive event are published, all sharing the payment
//! hash.

use std::time::Duration;

use opcn_channel::HtlcOutcome;
use opcn_core::ChannelId;
use opcn_node::{Node, NodeConfig};
use opcn_switch::{HtlcEventStream, HtlcRole};

const CHANNEL_CAPACITY: u64 = 100_000;
const PAYMENT_AMOUNT: u64 = 100;

struct Network {
    alice: Node,
    bob: Node,
    carol: Node,
    chan_alice_bob: ChannelId,
    chan_bob_carol: ChannelId,
}

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

/// Three connected nodes with announced channels A–B and B–C.
async fn three_node_network(bob_config: NodeConfig) -> Network {
    let alice = start_node(NodeConfig::with_id("alice"));
    let bob = start_node(bob_config);
    let carol = start_node(NodeConfig::with_id("carol"));

    alice.connect(&bob);
    bob.connect(&carol);

    let chan_alice_bob = alice
        .open_channel(bob.id(), CHANNEL_CAPACITY)
        .await
        .expect("open alice-bob");
    let chan_bob_carol = bob
        .open_channel(carol.id(), CHANNEL_CAPACITY)
        .await
        .expect("open bob-carol");

    // Wait for channel open gossip to spread to every node.
    for node in [&alice, &bob, &carol] {
        wait_announced(node, chan_alice_bob).await;
        wait_announced(node, chan_bob_carol).await;
    }

    Network {
        alice,
        bob,
        carol,
        chan_alice_bob,
        chan_bob_carol,
    }
}

async fn next_event(stream: &mut HtlcEventStream) -> opcn_switch::HtlcEvent {
    tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("event must arrive")
        .expect("stream must stay open")
}

async fn assert_no_more_events(stream: &mut HtlcEventStream) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(stream.try_recv().is_none(), "expected exactly one event");
}

#[tokio::test]
async fn test_two_hop_invoice_payment() {
    let net = three_node_network(NodeConfig::with_id("bob")).await;

    // Subscribe to HTLC events on every node before paying.
    let mut alice_events = net.alice.subscribe_htlc_events();
    let mut bob_events = net.bob.subscribe_htlc_events();
    let mut carol_events = net.carol.subscribe_htlc_events();

    // Carol issues the payment request; Alice pays it through Bob.
    let invoice = net.carol.add_invoice(PAYMENT_AMOUNT, "two hop test");
    let preimage = net
        .alice
        .pay(net.carol.id(), invoice.payment_hash, PAYMENT_AMOUNT)
        .await
        .expect("payment must settle");
    assert!(invoice.payment_hash.matches(&preimage));

    // Alice's view of A–B: her balance dropped by the payment amount.
    let alice_ab = net.alice.channel_balances(&net.chan_alice_bob).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT);
    assert_eq!(alice_ab.remote_balance, PAYMENT_AMOUNT);
    assert_eq!(alice_ab.pending_count, 0);

    // Bob's view of A–B mirrors it.
    let bob_ab = net.bob.channel_balances(&net.chan_alice_bob).unwrap();
    assert_eq!(bob_ab.local_balance, PAYMENT_AMOUNT);
    assert_eq!(bob_ab.remote_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT);

    // Bob's view of B–C: his balance dropped by the forwarded amount.
    let bob_bc = net.bob.channel_balances(&net.chan_bob_carol).unwrap();
    assert_eq!(bob_bc.local_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT);
    assert_eq!(bob_bc.remote_balance, PAYMENT_AMOUNT);

    // Carol's view of B–C mirrors it.
    let carol_bc = net.carol.channel_balances(&net.chan_bob_carol).unwrap();
    assert_eq!(carol_bc.local_balance, PAYMENT_AMOUNT);
    assert_eq!(carol_bc.remote_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT);

    // Exactly one SEND at Alice, one FORWARD at Bob, one RECEIVE at Carol,
    // all successful and sharing the payment hash.
    let send = next_event(&mut alice_events).await;
    assert_eq!(send.role, HtlcRole::Send);
    assert_eq!(send.outcome, HtlcOutcome::Success);
    assert_eq!(send.payment_hash, invoice.payment_hash);
    assert_eq!(send.amount, PAYMENT_AMOUNT);
    assert_no_more_events(&mut alice_events).await;

    let forward = next_event(&mut bob_events).await;
    assert_eq!(forward.role, HtlcRole::Forward);
    assert_eq!(forward.outcome, HtlcOutcome::Success);
    assert_eq!(forward.payment_hash, invoice.payment_hash);
    assert_eq!(forward.amount, PAYMENT_AMOUNT);
    assert_no_more_events(&mut bob_events).await;

    let receive = next_event(&mut carol_events).await;
    assert_eq!(receive.role, HtlcRole::Receive);
    assert_eq!(receive.outcome, HtlcOutcome::Success);
    assert_eq!(receive.payment_hash, invoice.payment_hash);
    assert_eq!(receive.amount, PAYMENT_AMOUNT);
    assert_no_more_events(&mut carol_events).await;

    // Carol's invoice is settled with the paid amount.
    let settled = net.carol.lookup_invoice(&invoice.payment_hash).unwrap();
    assert!(settled.settled);
    assert_eq!(settled.amount_paid, PAYMENT_AMOUNT);
}

#[tokio::test]
async fn test_two_hop_payment_with_forwarding_fee() {
    // Bob advertises a flat 10-unit fee on channels he opens (B–C), which
    // the route charges to Alice on the first hop.
    let mut bob_config = NodeConfig::with_id("bob");
    bob_config.payments.base_fee = 10;
    let net = three_node_network(bob_config).await;

    let invoice = net.carol.add_invoice(PAYMENT_AMOUNT, "fee test");
    net.alice
        .pay(net.carol.id(), invoice.payment_hash, PAYMENT_AMOUNT)
        .await
        .expect("payment must settle");

    // Alice paid amount + fee; Bob kept the fee; Carol got the amount.
    let alice_ab = net.alice.channel_balances(&net.chan_alice_bob).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT - 10);
    let bob_ab = net.bob.channel_balances(&net.chan_alice_bob).unwrap();
    assert_eq!(bob_ab.local_balance, PAYMENT_AMOUNT + 10);
    let bob_bc = net.bob.channel_balances(&net.chan_bob_carol).unwrap();
    assert_eq!(bob_bc.local_balance, CHANNEL_CAPACITY - PAYMENT_AMOUNT);
    let carol_bc = net.carol.channel_balances(&net.chan_bob_carol).unwrap();
    assert_eq!(carol_bc.local_balance, PAYMENT_AMOUNT);
}

#[tokio::test]
async fn test_consecutive_payments_accumulate() {
    let net = three_node_network(NodeConfig::with_id("bob")).await;

    for i in 1..=3u64 {
        let invoice = net.carol.add_invoice(PAYMENT_AMOUNT, "repeat");
        net.alice
            .pay(net.carol.id(), invoice.payment_hash, PAYMENT_AMOUNT)
            .await
            .expect("payment must settle");

        let carol_bc = net.carol.channel_balances(&net.chan_bob_carol).unwrap();
        assert_eq!(carol_bc.local_balance, PAYMENT_AMOUNT * i);
    }

    let alice_ab = net.alice.channel_balances(&net.chan_alice_bob).unwrap();
    assert_eq!(alice_ab.local_balance, CHANNEL_CAPACITY - 3 * PAYMENT_AMOUNT);
}
