use ringcast_core::{AckMode, MepType};
use ringcast_node::{MessageProperty, NodeConfig, NodeError, PublishOutcome};
use ringcast_sim::{SimError, Simulation};

fn acked(max_threshold: u16) -> MessageProperty {
    MessageProperty {
        mep_type: MepType::GROUP_TO_GROUP,
        ack_mode: AckMode::Destination,
        max_threshold,
        ..MessageProperty::default()
    }
}

#[test]
fn e2e_acknowledged_messages_raise_link_quality() {
    let mut sim = Simulation::new(NodeConfig::default(), 4).expect("sim");
    sim.announce(0, "orders", acked(20)).expect("announce");
    let inbox = sim.subscribe(1, "orders", acked(20)).expect("subscribe");

    for seq in 0..3_u8 {
        assert!(matches!(
            sim.publish(0, "orders", &[seq]).expect("publish"),
            PublishOutcome::Delivered { .. }
        ));
    }
    assert_eq!(inbox.lock().len(), 3);
    let publisher = sim.node(0).expect("node");
    assert_eq!(publisher.stats().acks_matched, 3);

    let interval = publisher.config().maintenance_interval_ms;
    sim.advance(interval).expect("advance");
    let publisher = sim.node(0).expect("node");
    let receiver_id = sim.node(1).expect("node").id().to_string();
    assert!(publisher.acks().is_empty().expect("acks"));
    let link = publisher
        .links()
        .get(&receiver_id)
        .expect("links")
        .expect("link stats");
    assert!(link.success_avg > 0.5);
    assert!(link.last_success_ms.is_some());
}

#[test]
fn e2e_partitioned_receiver_expires_the_ack() {
    let mut sim = Simulation::new(NodeConfig::default(), 4).expect("sim");
    sim.announce(0, "orders", acked(20)).expect("announce");
    let inbox = sim.subscribe(1, "orders", acked(20)).expect("subscribe");

    sim.set_partitioned(1, true).expect("partition");
    let err = sim.publish(0, "orders", b"lost").expect_err("unreachable");
    assert!(matches!(err, SimError::Node(NodeError::Transport(_))));

    let config = sim.node(0).expect("node").config().clone();
    sim.advance(config.ack_timeout_ms + config.maintenance_interval_ms)
        .expect("advance");
    sim.set_partitioned(1, false).expect("heal");

    assert!(inbox.lock().is_empty());
    let publisher = sim.node(0).expect("node");
    assert_eq!(publisher.stats().acks_expired, 1);
    let receiver_id = sim.node(1).expect("node").id().to_string();
    let link = publisher
        .links()
        .get(&receiver_id)
        .expect("links")
        .expect("link stats");
    assert_eq!(link.last_success_ms, None);
}
