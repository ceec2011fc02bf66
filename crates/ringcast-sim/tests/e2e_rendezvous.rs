use ringcast_core::{CacheOrder, CachePolicy, KeyPoint, MepType};
use ringcast_node::{MessageProperty, NodeConfig, PublishOutcome};
use ringcast_sim::Simulation;

fn property(max_threshold: u16) -> MessageProperty {
    MessageProperty {
        mep_type: MepType::GROUP_TO_GROUP,
        max_threshold,
        ..MessageProperty::default()
    }
}

#[test]
fn e2e_group_receivers_share_publisher_capacity() {
    let mut sim = Simulation::new(NodeConfig::default(), 6).expect("sim");
    sim.announce(0, "weather", property(4)).expect("announce");
    let inboxes: Vec<_> = (1..=3)
        .map(|index| sim.subscribe(index, "weather", property(4)).expect("subscribe"))
        .collect();

    for seq in 0..10 {
        let outcome = sim
            .publish(0, "weather", format!("m{seq}").as_bytes())
            .expect("publish");
        assert!(matches!(outcome, PublishOutcome::Delivered { .. }), "message {seq}: {outcome:?}");
    }

    let counts: Vec<usize> = inboxes.iter().map(|inbox| inbox.lock().len()).collect();
    assert_eq!(counts.iter().sum::<usize>(), 10);
    assert!(counts.iter().all(|count| *count <= 4), "{counts:?}");
    assert_eq!(sim.node(0).expect("node").stats().delivered, 10);
    assert_eq!(sim.frames_rejected(), 0);
}

#[test]
fn e2e_buffered_messages_drain_in_publish_order() {
    let mut sim = Simulation::new(NodeConfig::default(), 4).expect("sim");
    sim.announce(0, "news", property(5)).expect("announce");
    for seq in 0..3 {
        let outcome = sim
            .publish(0, "news", format!("m{seq}").as_bytes())
            .expect("publish");
        assert_eq!(outcome, PublishOutcome::Buffered);
    }

    let inbox = sim.subscribe(2, "news", property(5)).expect("subscribe");
    let payloads: Vec<Vec<u8>> = inbox.lock().iter().map(|m| m.payload.clone()).collect();
    assert_eq!(payloads, vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]);

    let ledger = sim
        .node(0)
        .expect("node")
        .ledger("news")
        .expect("table")
        .expect("ledger");
    assert_eq!(ledger.send_property.cached_len().expect("cache"), 0);
    assert_eq!(ledger.send_property.snapshot().expect("snapshot").msg_threshold, 0);
}

#[test]
fn e2e_reject_policy_bounds_the_pending_cache() {
    let mut sim = Simulation::new(NodeConfig::default(), 3).expect("sim");
    let strict = MessageProperty {
        cache_policy: CachePolicy::reject(CacheOrder::Fifo),
        ..property(2)
    };
    sim.announce(0, "alerts", strict).expect("announce");

    let outcomes: Vec<_> = (0..3_u8)
        .map(|seq| sim.publish(0, "alerts", &[seq]).expect("publish"))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            PublishOutcome::Buffered,
            PublishOutcome::Buffered,
            PublishOutcome::Rejected
        ]
    );
    let stats = sim.node(0).expect("node").stats();
    assert_eq!(stats.buffered, 2);
    assert_eq!(stats.rejected, 1);
}

#[test]
fn e2e_purge_policy_evicts_the_oldest() {
    let mut sim = Simulation::new(NodeConfig::default(), 3).expect("sim");
    sim.announce(0, "ticks", property(2)).expect("announce");
    for seq in 0..3_u8 {
        assert_eq!(
            sim.publish(0, "ticks", &[seq]).expect("publish"),
            PublishOutcome::Buffered
        );
    }
    assert_eq!(sim.node(0).expect("node").stats().purged, 1);

    let inbox = sim.subscribe(1, "ticks", property(2)).expect("subscribe");
    let payloads: Vec<Vec<u8>> = inbox.lock().iter().map(|m| m.payload.clone()).collect();
    assert_eq!(payloads, vec![vec![1], vec![2]]);
}

#[test]
fn e2e_single_receiver_keeps_latest_subscriber() {
    let mut sim = Simulation::new(NodeConfig::default(), 5).expect("sim");
    let single = MessageProperty {
        mep_type: MepType::GROUP_TO_ONE,
        ..property(5)
    };
    sim.announce(0, "lease", single.clone()).expect("announce");
    let first = sim.subscribe(1, "lease", single.clone()).expect("subscribe");
    let second = sim.subscribe(2, "lease", single).expect("subscribe");

    let outcome = sim.publish(0, "lease", b"holder").expect("publish");
    let expected = sim.node(2).expect("node").id().to_string();
    assert_eq!(outcome, PublishOutcome::Delivered { destination: expected });
    assert!(first.lock().is_empty());
    assert_eq!(second.lock().len(), 1);
}

#[test]
fn e2e_rendezvous_is_agreed_by_every_node() {
    let sim = Simulation::new(NodeConfig::default(), 16).expect("sim");
    let subjects = ["weather", "news", "alerts", "ticks"];
    for subject in subjects {
        let index = sim.rendezvous_index(subject).expect("rendezvous");
        let owner = sim.node(index).expect("node").point();
        let target = KeyPoint::from_string(subject);
        for node in sim.nodes() {
            assert!(owner.distance(&target) <= node.point().distance(&target));
        }
    }
}

#[test]
fn e2e_exhausted_receiver_stays_exhausted_across_publisher_refresh() {
    let config = NodeConfig::default();
    let refresh = config.token_refresh_ms;
    let mut sim = Simulation::new(config, 5).expect("sim");
    let rendezvous = sim.rendezvous_index("quota").expect("rendezvous");
    let mut others = (0..5).filter(|index| *index != rendezvous);
    let publisher = others.next().expect("publisher");
    let receiver = others.next().expect("receiver");

    sim.announce(publisher, "quota", property(5)).expect("announce");
    // the receiver's own refresh falls after the publisher's
    sim.advance(refresh / 2).expect("advance");
    let inbox = sim.subscribe(receiver, "quota", property(1)).expect("subscribe");

    let first = sim.publish(publisher, "quota", b"a").expect("publish");
    assert!(matches!(first, PublishOutcome::Delivered { .. }), "{first:?}");
    assert_eq!(
        sim.publish(publisher, "quota", b"b").expect("publish"),
        PublishOutcome::Buffered
    );

    sim.advance(refresh - refresh / 2).expect("advance");
    assert_eq!(inbox.lock().len(), 1);
    let ledger = sim
        .node(publisher)
        .expect("node")
        .ledger("quota")
        .expect("table")
        .expect("ledger");
    assert_eq!(ledger.send_property.cached_len().expect("cache"), 1);
}
