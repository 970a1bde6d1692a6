//! End-to-end scenarios for topic registration and search.
//!
//! Exercises the literal scenarios the core's contract is built around:
//! 1. Registration happy path (register, confirm, expire)
//! 2. Ticket deferral and re-ripening
//! 3. Error handling and bucket refill
//! 4. Search termination after consecutive empty lookups
//! 5. Sequence-number upgrades on both tables
//! 6. Lookup-target exploration bias
//!
//! Each test drives a `TestClock` directly rather than sleeping, so the
//! exact instants named by each scenario are asserted precisely.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use topic_discovery::clock::{Clock, TestClock};
use topic_discovery::distance::random_id_at;
use topic_discovery::record::{NodeId, NodeRecord, TopicId};
use topic_discovery::registration::{RegAttemptState, Registration, RegistrationConfig};
use topic_discovery::search::{Search, SearchConfig};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn node_at_dist(topic: &TopicId, dist: u32, seq: u64, port: u16) -> NodeRecord {
    let id = random_id_at(topic, dist);
    NodeRecord::new(id, seq, addr(port))
}

fn self_id() -> NodeId {
    [0u8; 32]
}

#[test]
fn scenario_1_registration_happy_path() {
    // =========================================================
    // Step 1: One candidate at logdist 250, reg_bucket_size = 1
    // =========================================================
    let topic: TopicId = [0x01u8; 32];
    let clock = Arc::new(TestClock::new());
    let cfg = RegistrationConfig::new(self_id(), clock.clone(), 1);
    let mut reg = Registration::new(topic, cfg).expect("valid config");

    let n = node_at_dist(&topic, 250, 1, 4001);
    reg.add_nodes(&[n.clone()]);

    // =========================================================
    // Step 2: next_update_time is now; update returns the attempt
    // =========================================================
    assert_eq!(reg.next_update_time(), Some(clock.now()));
    let id = reg.update().expect("attempt should be ripe immediately");
    assert_eq!(reg.attempt(id).node.id, n.id);

    // =========================================================
    // Step 3: start_request, then confirm with a 10-minute TTL
    // =========================================================
    reg.start_request(id);
    reg.handle_registered(id, Duration::from_secs(600));

    let expected_expiry = clock.now().saturating_add(Duration::from_secs(600));
    assert_eq!(reg.next_update_time(), Some(expected_expiry));
    assert_eq!(reg.attempt(id).state, RegAttemptState::Registered);

    // =========================================================
    // Step 4: after TTL + epsilon, the ad expires and vanishes
    // =========================================================
    clock.advance(Duration::from_secs(600) + Duration::from_millis(1));
    assert_eq!(reg.update(), None, "expired ad should destroy the attempt");
    assert_eq!(reg.next_update_time(), None, "bucket should now be empty");
}

#[test]
fn scenario_2_ticket_deferral() {
    let topic: TopicId = [0x02u8; 32];
    let clock = Arc::new(TestClock::new());
    let cfg = RegistrationConfig::new(self_id(), clock.clone(), 1);
    let mut reg = Registration::new(topic, cfg).expect("valid config");

    let n = node_at_dist(&topic, 250, 1, 4002);
    reg.add_nodes(&[n]);
    let id = reg.update().expect("ripe immediately");
    reg.start_request(id);

    // Registrar defers with a ticket and a 5-second wait.
    reg.handle_ticket_response(id, vec![0xAA], Duration::from_secs(5));
    assert_eq!(
        reg.next_update_time(),
        Some(clock.now().saturating_add(Duration::from_secs(5)))
    );
    assert_eq!(reg.attempt(id).state, RegAttemptState::Waiting);
    assert_eq!(reg.attempt(id).ticket, vec![0xAA]);

    // After the wait elapses, the attempt ripens again.
    clock.advance(Duration::from_secs(5) + Duration::from_millis(1));
    assert_eq!(reg.update(), Some(id));
}

#[test]
fn scenario_3_error_removes_and_refills() {
    let topic: TopicId = [0x03u8; 32];
    let clock = Arc::new(TestClock::new());
    let cfg = RegistrationConfig::new(self_id(), clock.clone(), 1);
    let mut reg = Registration::new(topic, cfg).expect("valid config");

    let n1 = node_at_dist(&topic, 250, 1, 4003);
    let n2 = node_at_dist(&topic, 250, 1, 4004);
    reg.add_nodes(&[n1.clone(), n2.clone()]);

    // One promoted to Waiting, the other sits in Standby.
    let id1 = reg.update().expect("n1 or n2 is waiting");
    let waiting_id = reg.attempt(id1).node.id;
    assert!(waiting_id == n1.id || waiting_id == n2.id);

    reg.start_request(id1);
    reg.handle_error_response(id1, "timeout");

    // The other candidate promotes and is immediately ripe.
    let id2 = reg.update().expect("the surviving candidate promotes");
    let promoted_id = reg.attempt(id2).node.id;
    assert_ne!(promoted_id, waiting_id);
    assert_eq!(reg.attempt(id2).next_time, clock.now());
}

#[test]
fn scenario_4_search_termination() {
    let topic: TopicId = [0x04u8; 32];
    let clock = Arc::new(TestClock::new());
    let cfg = SearchConfig::new(self_id(), clock, 16);
    let mut search = Search::new(topic, cfg).expect("valid config");

    // =========================================================
    // Step 1: first lookup batch brings 3 brand-new nodes
    // =========================================================
    let n1 = node_at_dist(&topic, 200, 1, 4005);
    let n2 = node_at_dist(&topic, 201, 1, 4006);
    let n3 = node_at_dist(&topic, 202, 1, 4007);
    search.add_nodes(None, &[n1.clone(), n2.clone(), n3.clone()]);

    // =========================================================
    // Step 2: query one target; its result set is empty
    // =========================================================
    let target = search.query_target().expect("a candidate is available");
    search.add_query_results(&target, &[]);

    // =========================================================
    // Step 3: two further lookups re-observe only already-seen IDs
    // =========================================================
    let remaining: Vec<NodeRecord> = [n1, n2, n3]
        .into_iter()
        .filter(|n| n.id != target.id)
        .collect();
    search.add_nodes(None, &remaining);
    search.add_nodes(None, &remaining);

    // =========================================================
    // Step 4: drain the remaining candidates, then assert done
    // =========================================================
    for n in &remaining {
        search.add_query_results(n, &[]);
    }
    assert!(search.peek_result().is_none());
    assert!(search.is_done());
}

#[test]
fn scenario_5_sequence_upgrade_both_tables() {
    // Registration side.
    let reg_topic: TopicId = [0x05u8; 32];
    let clock = Arc::new(TestClock::new());
    let reg_cfg = RegistrationConfig::new(self_id(), clock, 1);
    let mut reg = Registration::new(reg_topic, reg_cfg).expect("valid config");

    let n = node_at_dist(&reg_topic, 250, 1, 4008);
    reg.add_nodes(&[n.clone()]);
    let id = reg.update().expect("ripe");
    reg.start_request(id);
    reg.handle_ticket_response(id, vec![0xAA], Duration::from_secs(5));

    let mut upgraded = n.clone();
    upgraded.seq = 2;
    reg.add_nodes(&[upgraded]);
    assert_eq!(reg.attempt(id).node.seq, 2);
    assert_eq!(reg.attempt(id).state, RegAttemptState::Waiting);
    assert_eq!(reg.attempt(id).ticket, vec![0xAA]);

    // Search side.
    let search_topic: TopicId = [0x06u8; 32];
    let clock2 = Arc::new(TestClock::new());
    let search_cfg = SearchConfig::new(self_id(), clock2, 16);
    let mut search = Search::new(search_topic, search_cfg).expect("valid config");

    let sn = node_at_dist(&search_topic, 200, 1, 4009);
    search.add_nodes(None, &[sn.clone()]);
    let mut sn_upgraded = sn.clone();
    sn_upgraded.seq = 2;
    search.add_nodes(None, &[sn_upgraded]);

    let target = search.query_target().expect("still present as a candidate");
    assert_eq!(target.id, sn.id);
    assert_eq!(target.seq, 2);
}

#[test]
fn scenario_6_lookup_target_steers_exploration() {
    let topic: TopicId = [0x07u8; 32];
    let clock = Arc::new(TestClock::new());
    let cfg = RegistrationConfig::new(self_id(), clock, 1);
    let mut reg = Registration::new(topic, cfg).expect("valid config");

    // Register and confirm 10 candidates, all at logdist 256 (bucket 39).
    for i in 0..10u64 {
        let n = node_at_dist(&topic, 256, i + 1, 4100 + i as u16);
        reg.add_nodes(&[n]);
        let id = reg.update().expect("ripe");
        reg.start_request(id);
        reg.handle_registered(id, Duration::from_secs(3600));
    }
    assert_eq!(reg.bucket_count(39, RegAttemptState::Registered), 10);

    // Every other bucket is still uncovered, so the target steers toward
    // bucket 0's distance rather than the topic ID itself.
    let target = reg.lookup_target();
    assert_eq!(
        topic_discovery::distance::logdist(&topic, &target),
        reg.bucket_dist(0)
    );
    assert_ne!(target, topic);
}
