//! Aggregates built the way a chain of nodes nests them

use skein_core::NodeId;
use skein_topology::{
    EMPTY_TOPOLOGY, approx_node_count, contains_id, encode, exact_node_count, extract_ids,
    parse_topology,
};

/// Node 1 links to 2, 2 links to 3 and 30; node 40 hangs off 1 directly.
fn chain() -> String {
    let behind_two = encode(
        [(NodeId(3), EMPTY_TOPOLOGY), (NodeId(30), EMPTY_TOPOLOGY)],
        NodeId(2),
    );
    encode(
        [
            (NodeId(2), behind_two.as_str()),
            (NodeId::UNASSIGNED, EMPTY_TOPOLOGY),
            (NodeId(40), EMPTY_TOPOLOGY),
        ],
        NodeId(1),
    )
}

#[test]
fn test_nested_ids_in_textual_order() {
    let text = chain();
    let ids: Vec<NodeId> = extract_ids(&text).collect();
    assert_eq!(ids, vec![NodeId(2), NodeId(3), NodeId(30), NodeId(40)]);
}

#[test]
fn test_membership_is_token_exact_at_depth() {
    let text = chain();
    assert!(contains_id(&text, NodeId(30)));
    assert!(contains_id(&text, NodeId(3)));
    assert!(!contains_id(&text, NodeId(4)));
    assert!(!contains_id(&text, NodeId(1)));
}

#[test]
fn test_exact_and_approximate_counts() {
    let text = chain();
    assert_eq!(exact_node_count(&text).unwrap(), 4);
    assert!(approx_node_count(&text) >= 1);

    let trees = parse_topology(&text).unwrap();
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[0].depth(), 2);
    assert!(trees[0].contains(NodeId(30)));
}

#[test]
fn test_restarting_a_scan() {
    let text = chain();
    let mut ids = extract_ids(&text);
    assert_eq!(ids.next(), Some(NodeId(2)));

    let resumed = ids.clone();
    assert_eq!(ids.count(), 3);
    assert_eq!(resumed.collect::<Vec<_>>(), vec![NodeId(3), NodeId(30), NodeId(40)]);
}
