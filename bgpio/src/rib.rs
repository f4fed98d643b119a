//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use bgpio_utils::bgp::AfiSafi;
use chrono::{DateTime, Utc};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::packet::attribute::{self, Attrs, ATTR_MIN_LEN_EXT};
use crate::packet::message::{
    EncodeCxt, Message, MpNextHop, MpReachNlri, MpUnreachNlri, UpdateMsg,
};
use crate::packet::nlri::{InetNlri, Nlri, NlriKey};

// Guard against pathological split hints expanding a single change into an
// unbounded number of prefixes.
const MAX_SPLIT_EXPANSION: u64 = 1 << 16;

// Interned attribute set shared by every route carrying it.
#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AttrSet {
    pub index: u64,
    pub value: Attrs,
}

// Attribute set interning context.
#[derive(Debug, Default)]
pub struct AttrSets {
    pub tree: BTreeMap<Attrs, Arc<AttrSet>>,
    next_index: u64,
}

// A pending or transmitted routing change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Change {
    Announce {
        nlri: Nlri,
        attrs: Arc<AttrSet>,
        // Expand the prefix into /N-sized subnets before transmission.
        split: Option<u8>,
    },
    Withdraw {
        nlri: Nlri,
    },
}

//
// Per-peer outgoing adjacency RIB.
//
// Each family holds two keyed sets: the queued changes not yet sent to the
// peer, and the cached state the peer currently believes (the last
// transmitted announcements). Insertion supersedes any queued change with
// the same key while preserving arrival order.
//
#[derive(Debug, Default)]
pub struct AdjRibOut {
    families: BTreeMap<AfiSafi, RibOutFamily>,
}

#[derive(Debug, Default)]
struct RibOutFamily {
    queued: BTreeMap<NlriKey, (u64, Change)>,
    cached: BTreeMap<NlriKey, (u64, Change)>,
    next_seq: u64,
}

// Per-peer incoming adjacency RIB: a mirror of what the neighbor announced.
#[derive(Debug, Default)]
pub struct AdjRibIn {
    families: BTreeMap<AfiSafi, BTreeMap<NlriKey, InEntry>>,
}

#[derive(Clone, Debug)]
pub struct InEntry {
    pub nlri: Nlri,
    pub attrs: Option<Arc<AttrSet>>,
    // Set when the entry was downgraded by RFC 7606 treat-as-withdraw
    // handling; the route stays visible but carries no usable attributes.
    pub withdrawn: bool,
    pub last_modified: DateTime<Utc>,
}

// ===== impl AttrSets =====

impl AttrSets {
    pub fn get(&mut self, attrs: &Attrs) -> Arc<AttrSet> {
        if let Some(attr_set) = self.tree.get(attrs) {
            Arc::clone(attr_set)
        } else {
            self.next_index += 1;
            let attr_set = Arc::new(AttrSet {
                index: self.next_index,
                value: attrs.clone(),
            });
            self.tree.insert(attrs.clone(), Arc::clone(&attr_set));
            attr_set
        }
    }
}

// ===== impl Change =====

impl Change {
    pub fn nlri(&self) -> &Nlri {
        match self {
            Change::Announce { nlri, .. } => nlri,
            Change::Withdraw { nlri } => nlri,
        }
    }

    pub fn key(&self) -> NlriKey {
        self.nlri().key()
    }

    pub fn is_withdraw(&self) -> bool {
        matches!(self, Change::Withdraw { .. })
    }
}

// ===== impl AdjRibOut =====

impl AdjRibOut {
    // Queues a change, superseding any pending change for the same key.
    pub fn queue(&mut self, change: Change) {
        let afi_safi = change.nlri().afi_safi();
        let family = self.families.entry(afi_safi).or_default();
        let seq = family.next_seq;
        family.next_seq += 1;
        family.queued.insert(change.key(), (seq, change));
    }

    // Returns the pending changes of a family in arrival order.
    pub fn queued_changes(&self, afi_safi: AfiSafi) -> Vec<&Change> {
        let Some(family) = self.families.get(&afi_safi) else {
            return Vec::new();
        };
        let mut changes: Vec<_> = family.queued.values().collect();
        changes.sort_by_key(|(seq, _)| *seq);
        changes.into_iter().map(|(_, change)| change).collect()
    }

    // Returns the last transmitted state of a family (what the peer
    // believes we advertised) in transmission order.
    pub fn cached_changes(&self, afi_safi: AfiSafi) -> Vec<&Change> {
        let Some(family) = self.families.get(&afi_safi) else {
            return Vec::new();
        };
        let mut changes: Vec<_> = family.cached.values().collect();
        changes.sort_by_key(|(seq, _)| *seq);
        changes.into_iter().map(|(_, change)| change).collect()
    }

    // Drains the pending changes of a family, moving announcements into the
    // cached-sent state and dropping withdrawn keys from it.
    pub fn take_queued(&mut self, afi_safi: AfiSafi) -> Vec<Change> {
        let Some(family) = self.families.get_mut(&afi_safi) else {
            return Vec::new();
        };
        let mut changes: Vec<_> =
            std::mem::take(&mut family.queued).into_iter().collect();
        changes.sort_by_key(|(_, (seq, _))| *seq);

        let mut result = Vec::with_capacity(changes.len());
        for (key, (seq, change)) in changes {
            match &change {
                Change::Announce { .. } => {
                    family.cached.insert(key, (seq, change.clone()));
                }
                Change::Withdraw { .. } => {
                    family.cached.remove(&key);
                }
            }
            result.push(change);
        }
        result
    }

    // Re-queues every cached entry of a family, in the order it was sent.
    // This is the response to a ROUTE-REFRESH request.
    pub fn refresh(&mut self, afi_safi: AfiSafi) {
        let Some(family) = self.families.get_mut(&afi_safi) else {
            return;
        };
        let mut cached: Vec<_> = family.cached.values().cloned().collect();
        cached.sort_by_key(|(seq, _)| *seq);
        for (_, change) in cached {
            let seq = family.next_seq;
            family.next_seq += 1;
            family.queued.insert(change.key(), (seq, change));
        }
    }

    // Queues a withdrawal for every cached entry of every family.
    pub fn withdraw_all(&mut self) {
        let cached: Vec<Nlri> = self
            .families
            .values()
            .flat_map(|family| family.cached.values())
            .map(|(_, change)| change.nlri().clone())
            .collect();
        for nlri in cached {
            self.queue(Change::Withdraw { nlri });
        }
    }

    // Families with pending changes.
    pub fn pending_families(&self) -> Vec<AfiSafi> {
        self.families
            .iter()
            .filter(|(_, family)| !family.queued.is_empty())
            .map(|(afi_safi, _)| *afi_safi)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.families
            .values()
            .any(|family| !family.queued.is_empty())
    }

    // Discards pending changes but keeps the cached-sent state. Used on
    // graceful restart, where the peer preserves forwarding state and the
    // cache is re-advertised on reconnect.
    pub fn preserve_cache(&mut self) {
        for family in self.families.values_mut() {
            family.queued.clear();
        }
    }

    // Re-queues the cached state of every family for re-advertisement.
    pub fn requeue_cache(&mut self) {
        let families: Vec<_> = self.families.keys().copied().collect();
        for afi_safi in families {
            self.refresh(afi_safi);
        }
    }

    pub fn clear(&mut self) {
        self.families.clear();
    }
}

// ===== impl AdjRibIn =====

impl AdjRibIn {
    // Records an announcement from the peer.
    pub fn announce(&mut self, nlri: Nlri, attrs: Arc<AttrSet>) {
        let afi_safi = nlri.afi_safi();
        let family = self.families.entry(afi_safi).or_default();
        family.insert(
            nlri.key(),
            InEntry {
                nlri,
                attrs: Some(attrs),
                withdrawn: false,
                last_modified: Utc::now(),
            },
        );
    }

    // Removes a route withdrawn by the peer.
    pub fn withdraw(&mut self, nlri: &Nlri) {
        if let Some(family) = self.families.get_mut(&nlri.afi_safi()) {
            family.remove(&nlri.key());
        }
    }

    // Downgrades an announcement to a withdrawal without hiding it: the
    // route stays visible to the API with no attributes attached.
    pub fn treat_as_withdraw(&mut self, nlri: Nlri) {
        let afi_safi = nlri.afi_safi();
        let family = self.families.entry(afi_safi).or_default();
        family.insert(
            nlri.key(),
            InEntry {
                nlri,
                attrs: None,
                withdrawn: true,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (AfiSafi, &InEntry)> + '_ {
        self.families.iter().flat_map(|(afi_safi, family)| {
            family.values().map(move |entry| (*afi_safi, entry))
        })
    }

    pub fn len(&self) -> usize {
        self.families.values().map(|family| family.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.families.clear();
    }
}

// ===== update generation =====

// Builds the UPDATE messages for one family's drained change list.
//
// Withdrawals are emitted before announcements; announcements sharing an
// attribute set are packed together until the negotiated message size is
// exhausted.
pub fn generate_updates(
    afi_safi: AfiSafi,
    changes: Vec<Change>,
    cxt: &EncodeCxt,
    nbr_addr: IpAddr,
) -> Vec<Message> {
    let max_len = cxt.max_msg_len();
    let addpath = cxt.addpath_tx(afi_safi);
    let mut msgs = Vec::new();

    // Apply prefix splitting before anything else.
    let changes = expand_splits(changes);

    // Separate withdrawals from announcements, preserving order.
    let mut withdraws = Vec::new();
    let mut announces = Vec::new();
    for change in changes {
        match change {
            Change::Withdraw { nlri } => withdraws.push(nlri),
            Change::Announce { nlri, attrs, .. } => {
                announces.push((nlri, attrs));
            }
        }
    }

    // Withdrawals first, to avoid transient inconsistency at the receiver.
    if !withdraws.is_empty() {
        let budget = if afi_safi == AfiSafi::Ipv4Unicast {
            max_len - UpdateMsg::MIN_LEN
        } else {
            max_len
                - UpdateMsg::MIN_LEN
                - ATTR_MIN_LEN_EXT
                - MpUnreachNlri::MIN_LEN
        };
        let budget = budget as usize;

        for chunk in chunk_nlris(withdraws, budget, addpath) {
            let mut msg = UpdateMsg::default();
            if afi_safi == AfiSafi::Ipv4Unicast {
                msg.unreach = chunk;
            } else {
                msg.mp_unreach = Some(MpUnreachNlri {
                    afi_safi,
                    nlris: chunk,
                });
            }
            msgs.push(Message::Update(Box::new(msg)));
        }
    }

    // Group announcements sharing an identical attribute set, keeping the
    // arrival order of both the groups and their members.
    let mut groups: Vec<(Arc<AttrSet>, Vec<Nlri>)> = Vec::new();
    let mut group_index: BTreeMap<Arc<AttrSet>, usize> = BTreeMap::new();
    for (nlri, attrs) in announces {
        match group_index.get(&attrs) {
            Some(&pos) => groups[pos].1.push(nlri),
            None => {
                group_index.insert(attrs.clone(), groups.len());
                groups.push((attrs, vec![nlri]));
            }
        }
    }

    for (attrs, nlris) in groups {
        let attrs_len = attrs.value.length();
        let (budget, nexthop) = if afi_safi == AfiSafi::Ipv4Unicast {
            let budget = max_len
                .saturating_sub(UpdateMsg::MIN_LEN)
                .saturating_sub(attrs_len)
                .saturating_sub(attribute::nexthop::length());
            (budget as usize, MpNextHop::None)
        } else {
            let nexthop = mp_nexthop(afi_safi, &attrs.value);
            let budget = max_len
                .saturating_sub(UpdateMsg::MIN_LEN)
                .saturating_sub(attrs_len)
                .saturating_sub(ATTR_MIN_LEN_EXT)
                .saturating_sub(MpReachNlri::MIN_LEN)
                .saturating_sub(nexthop_wire_len(&nexthop));
            (budget as usize, nexthop)
        };

        // A change whose NLRI alone exceeds the budget cannot be sent.
        let mut nlris = nlris;
        nlris.retain(|nlri| {
            if budget == 0 || nlri.encoded_len(addpath) > budget {
                Error::NlriTooLarge(nbr_addr, nlri.to_string()).log();
                return false;
            }
            true
        });

        for chunk in chunk_nlris(nlris, budget, addpath) {
            let mut msg = UpdateMsg {
                attrs: Some(attrs.value.clone()),
                ..Default::default()
            };
            if afi_safi == AfiSafi::Ipv4Unicast {
                msg.reach = chunk;
            } else {
                msg.mp_reach = Some(MpReachNlri {
                    afi_safi,
                    nexthop,
                    nlris: chunk,
                });
            }
            msgs.push(Message::Update(Box::new(msg)));
        }
    }

    msgs
}

// Splits an NLRI list into chunks whose encoded size fits the budget.
fn chunk_nlris(
    nlris: Vec<Nlri>,
    budget: usize,
    addpath: bool,
) -> Vec<Vec<Nlri>> {
    let mut chunks = Vec::new();
    let mut chunk = Vec::new();
    let mut used = 0;
    for nlri in nlris {
        let len = nlri.encoded_len(addpath);
        if used + len > budget && !chunk.is_empty() {
            chunks.push(std::mem::take(&mut chunk));
            used = 0;
        }
        used += len;
        chunk.push(nlri);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

// Expands announcements carrying a `split /N` hint into the corresponding
// /N-sized subnets, each inheriting the original attribute set. Splitting
// only applies to plain unicast prefixes shorter than /N.
fn expand_splits(changes: Vec<Change>) -> Vec<Change> {
    let mut result = Vec::with_capacity(changes.len());
    for change in changes {
        let Change::Announce {
            nlri: Nlri::Unicast(inet),
            attrs,
            split: Some(split),
        } = &change
        else {
            result.push(change);
            continue;
        };

        let plen = inet.prefix.prefix();
        if *split <= plen {
            result.push(change);
            continue;
        }

        let count = 1u64 << (split - plen).min(63);
        if count > MAX_SPLIT_EXPANSION {
            Error::NlriTooLarge(
                IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                format!("split /{} of {}", split, inet.prefix),
            )
            .log();
            result.push(change.clone());
            continue;
        }

        match inet.prefix {
            IpNetwork::V4(prefix) => {
                if *split > 32 {
                    result.push(change.clone());
                    continue;
                }
                let base = u32::from(prefix.network());
                let step = 1u32 << (32 - split);
                for pos in 0..count as u32 {
                    let addr = base + pos * step;
                    let subnet =
                        Ipv4Network::new(addr.into(), *split).unwrap();
                    result.push(Change::Announce {
                        nlri: Nlri::Unicast(InetNlri {
                            prefix: IpNetwork::V4(subnet),
                            path_id: inet.path_id,
                        }),
                        attrs: attrs.clone(),
                        split: None,
                    });
                }
            }
            IpNetwork::V6(prefix) => {
                if *split > 128 {
                    result.push(change.clone());
                    continue;
                }
                let base = u128::from(prefix.network());
                let step = 1u128 << (128 - split);
                for pos in 0..count as u128 {
                    let addr = base + pos * step;
                    let subnet =
                        Ipv6Network::new(addr.into(), *split).unwrap();
                    result.push(Change::Announce {
                        nlri: Nlri::Unicast(InetNlri {
                            prefix: IpNetwork::V6(subnet),
                            path_id: inet.path_id,
                        }),
                        attrs: attrs.clone(),
                        split: None,
                    });
                }
            }
        }
    }
    result
}

// Builds the MP_REACH_NLRI next hop for a family from the attribute set.
fn mp_nexthop(afi_safi: AfiSafi, attrs: &Attrs) -> MpNextHop {
    use std::net::IpAddr;

    // FlowSpec routes carry no next hop.
    if matches!(
        afi_safi,
        AfiSafi::Ipv4Flowspec
            | AfiSafi::Ipv6Flowspec
            | AfiSafi::Ipv4FlowspecVpn
            | AfiSafi::Ipv6FlowspecVpn
    ) {
        return MpNextHop::None;
    }

    match (afi_safi, attrs.base.nexthop) {
        (AfiSafi::Ipv4Vpn, Some(IpAddr::V4(addr))) => {
            MpNextHop::VpnIpv4(addr)
        }
        (AfiSafi::Ipv6Vpn, Some(IpAddr::V6(addr))) => {
            MpNextHop::VpnIpv6(addr)
        }
        (_, Some(IpAddr::V4(addr))) => MpNextHop::Ipv4(addr),
        (_, Some(IpAddr::V6(addr))) => MpNextHop::Ipv6 {
            global: addr,
            link_local: attrs.base.ll_nexthop,
        },
        (_, None) => MpNextHop::None,
    }
}

// Wire size of the encoded next hop.
fn nexthop_wire_len(nexthop: &MpNextHop) -> u16 {
    match nexthop {
        MpNextHop::None => 0,
        MpNextHop::Ipv4(_) => 4,
        MpNextHop::VpnIpv4(_) => 12,
        MpNextHop::Ipv6 { link_local, .. } => {
            if link_local.is_some() {
                32
            } else {
                16
            }
        }
        MpNextHop::VpnIpv6(_) => 24,
    }
}
