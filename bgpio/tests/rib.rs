//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio::neighbor::PeerType;
use bgpio::packet::attribute::{AsPath, Attrs};
use bgpio::packet::message::{EncodeCxt, Message, NegotiatedCapability};
use bgpio::packet::nlri::{InetNlri, Nlri};
use bgpio::rib::{generate_updates, AdjRibOut, AttrSets, Change};
use bgpio_utils::bgp::AfiSafi;

fn nbr_addr() -> IpAddr {
    "192.0.2.100".parse().unwrap()
}

fn encode_cxt() -> EncodeCxt {
    EncodeCxt {
        peer_type: PeerType::External,
        capabilities: [
            NegotiatedCapability::FourOctetAsNumber,
            NegotiatedCapability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            },
            NegotiatedCapability::MultiProtocol {
                afi_safi: AfiSafi::Ipv6Unicast,
            },
        ]
        .into(),
    }
}

fn unicast(prefix: &str) -> Nlri {
    Nlri::Unicast(InetNlri {
        prefix: prefix.parse().unwrap(),
        path_id: None,
    })
}

fn attrs(nexthop: &str, med: Option<u32>) -> Attrs {
    let mut attrs = Attrs::default();
    attrs.base.as_path = AsPath::from_sequence([65001]);
    attrs.base.nexthop = Some(nexthop.parse().unwrap());
    attrs.base.med = med;
    attrs
}

// A later change for the same key supersedes the earlier one.
#[test]
fn test_queue_supersede() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    rib_out.queue(Change::Announce {
        nlri: unicast("203.0.113.0/24"),
        attrs: interned.clone(),
        split: None,
    });
    rib_out.queue(Change::Announce {
        nlri: unicast("198.51.100.0/24"),
        attrs: interned,
        split: None,
    });
    rib_out.queue(Change::Withdraw {
        nlri: unicast("203.0.113.0/24"),
    });

    let queued = rib_out.queued_changes(AfiSafi::Ipv4Unicast);
    assert_eq!(queued.len(), 2);
    // The withdraw replaced the first announcement but kept no duplicate
    // key; the remaining announcement kept its original position.
    assert!(queued.iter().any(|change| change.is_withdraw()));
}

// Withdrawing a key that was never announced must still be emitted; that
// is what allows route flushing across reconfigurations.
#[test]
fn test_withdraw_unannounced() {
    let mut rib_out = AdjRibOut::default();
    rib_out.queue(Change::Withdraw {
        nlri: unicast("203.0.113.0/24"),
    });

    let changes = rib_out.take_queued(AfiSafi::Ipv4Unicast);
    assert_eq!(changes.len(), 1);

    let msgs =
        generate_updates(AfiSafi::Ipv4Unicast, changes, &encode_cxt(), nbr_addr());
    assert_eq!(msgs.len(), 1);
    let Message::Update(msg) = &msgs[0] else {
        panic!("expected an UPDATE");
    };
    assert_eq!(msg.unreach.len(), 1);
    assert!(msg.reach.is_empty());
}

// Draining the queue moves announcements into the cached-sent state;
// withdrawals remove their keys from it.
#[test]
fn test_cached_state() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    rib_out.queue(Change::Announce {
        nlri: unicast("203.0.113.0/24"),
        attrs: interned.clone(),
        split: None,
    });
    rib_out.queue(Change::Announce {
        nlri: unicast("198.51.100.0/24"),
        attrs: interned,
        split: None,
    });
    rib_out.take_queued(AfiSafi::Ipv4Unicast);
    assert_eq!(rib_out.cached_changes(AfiSafi::Ipv4Unicast).len(), 2);

    rib_out.queue(Change::Withdraw {
        nlri: unicast("203.0.113.0/24"),
    });
    rib_out.take_queued(AfiSafi::Ipv4Unicast);
    let cached = rib_out.cached_changes(AfiSafi::Ipv4Unicast);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].nlri(), &unicast("198.51.100.0/24"));
}

// A refresh re-queues the cached-sent state in transmission order.
#[test]
fn test_refresh_replays_cache() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    for prefix in ["203.0.113.0/24", "198.51.100.0/24", "192.0.2.0/24"] {
        rib_out.queue(Change::Announce {
            nlri: unicast(prefix),
            attrs: interned.clone(),
            split: None,
        });
    }
    rib_out.take_queued(AfiSafi::Ipv4Unicast);
    assert!(rib_out.queued_changes(AfiSafi::Ipv4Unicast).is_empty());

    rib_out.refresh(AfiSafi::Ipv4Unicast);
    let queued = rib_out.queued_changes(AfiSafi::Ipv4Unicast);
    assert_eq!(queued.len(), 3);
    assert_eq!(queued[0].nlri(), &unicast("203.0.113.0/24"));
    assert_eq!(queued[1].nlri(), &unicast("198.51.100.0/24"));
    assert_eq!(queued[2].nlri(), &unicast("192.0.2.0/24"));
}

// All withdrawals for a family precede its announcements in the generated
// message sequence.
#[test]
fn test_withdraw_before_announce() {
    let mut attr_sets = AttrSets::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    let changes = vec![
        Change::Announce {
            nlri: unicast("203.0.113.0/24"),
            attrs: interned.clone(),
            split: None,
        },
        Change::Withdraw {
            nlri: unicast("198.51.100.0/24"),
        },
        Change::Announce {
            nlri: unicast("192.0.2.0/24"),
            attrs: interned,
            split: None,
        },
    ];

    let msgs =
        generate_updates(AfiSafi::Ipv4Unicast, changes, &encode_cxt(), nbr_addr());
    let mut seen_announce = false;
    for msg in &msgs {
        let Message::Update(msg) = msg else {
            panic!("expected an UPDATE");
        };
        if !msg.reach.is_empty() {
            seen_announce = true;
        }
        if !msg.unreach.is_empty() {
            assert!(
                !seen_announce,
                "withdrawal emitted after an announcement"
            );
        }
    }
    assert!(seen_announce);
}

// Announcements sharing an attribute set are packed into a single UPDATE;
// distinct attribute sets produce distinct UPDATEs.
#[test]
fn test_attribute_grouping() {
    let mut attr_sets = AttrSets::default();

    let value_a = attrs("10.0.0.1", None);
    let value_b = attrs("10.0.0.1", Some(50));
    let group_a = attr_sets.get(&value_a);
    let group_b = attr_sets.get(&value_b);

    let changes = vec![
        Change::Announce {
            nlri: unicast("203.0.113.0/24"),
            attrs: group_a.clone(),
            split: None,
        },
        Change::Announce {
            nlri: unicast("198.51.100.0/24"),
            attrs: group_b,
            split: None,
        },
        Change::Announce {
            nlri: unicast("192.0.2.0/24"),
            attrs: group_a,
            split: None,
        },
    ];

    let msgs =
        generate_updates(AfiSafi::Ipv4Unicast, changes, &encode_cxt(), nbr_addr());
    assert_eq!(msgs.len(), 2);
    let Message::Update(first) = &msgs[0] else {
        panic!("expected an UPDATE");
    };
    assert_eq!(first.reach.len(), 2);
    let Message::Update(second) = &msgs[1] else {
        panic!("expected an UPDATE");
    };
    assert_eq!(second.reach.len(), 1);
    assert_eq!(second.attrs.as_ref().unwrap().base.med, Some(50));
}

// A `split /26` hint expands a /24 into four /26 announcements carrying
// the same attribute set.
#[test]
fn test_prefix_splitting() {
    let mut attr_sets = AttrSets::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    let changes = vec![Change::Announce {
        nlri: unicast("203.0.113.0/24"),
        attrs: interned,
        split: Some(26),
    }];

    let msgs =
        generate_updates(AfiSafi::Ipv4Unicast, changes, &encode_cxt(), nbr_addr());
    assert_eq!(msgs.len(), 1);
    let Message::Update(msg) = &msgs[0] else {
        panic!("expected an UPDATE");
    };
    let prefixes: Vec<String> =
        msg.reach.iter().map(|nlri| nlri.to_string()).collect();
    assert_eq!(
        prefixes,
        vec![
            "203.0.113.0/26",
            "203.0.113.64/26",
            "203.0.113.128/26",
            "203.0.113.192/26",
        ]
    );
}

// IPv6 unicast rides in MP_REACH/MP_UNREACH, withdrawals still first.
#[test]
fn test_mp_family_generation() {
    let mut attr_sets = AttrSets::default();

    let value = attrs("2001:db8::1", None);
    let interned = attr_sets.get(&value);
    let changes = vec![
        Change::Announce {
            nlri: unicast("2001:db8:1::/48"),
            attrs: interned,
            split: None,
        },
        Change::Withdraw {
            nlri: unicast("2001:db8:2::/48"),
        },
    ];

    let msgs =
        generate_updates(AfiSafi::Ipv6Unicast, changes, &encode_cxt(), nbr_addr());
    assert_eq!(msgs.len(), 2);
    let Message::Update(first) = &msgs[0] else {
        panic!("expected an UPDATE");
    };
    assert!(first.mp_unreach.is_some());
    let Message::Update(second) = &msgs[1] else {
        panic!("expected an UPDATE");
    };
    let mp_reach = second.mp_reach.as_ref().unwrap();
    assert_eq!(mp_reach.afi_safi, AfiSafi::Ipv6Unicast);
    assert_eq!(mp_reach.nlris.len(), 1);
}

// Large prefix batches are split across messages within the negotiated
// size budget.
#[test]
fn test_message_size_budget() {
    let mut attr_sets = AttrSets::default();

    let value = attrs("10.0.0.1", None);
    let interned = attr_sets.get(&value);
    let mut changes = Vec::new();
    for third in 0..10 {
        for fourth in 0..250 {
            changes.push(Change::Announce {
                nlri: unicast(&format!("10.{}.{}.0/24", third, fourth)),
                attrs: interned.clone(),
                split: None,
            });
        }
    }

    let msgs = generate_updates(
        AfiSafi::Ipv4Unicast,
        changes,
        &encode_cxt(),
        nbr_addr(),
    );
    assert!(msgs.len() > 1);

    let cxt = encode_cxt();
    let mut total = 0;
    for msg in &msgs {
        let encoded = msg.encode(&cxt);
        assert!(encoded.len() <= 4096);
        let Message::Update(msg) = msg else {
            panic!("expected an UPDATE");
        };
        total += msg.reach.len();
    }
    assert_eq!(total, 2500);
}
