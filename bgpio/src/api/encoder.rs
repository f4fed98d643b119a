//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

//! Text and JSON rendering of session state, RIB contents and events for
//! the helper channel.

use itertools::Itertools;
use serde_json::json;

use crate::api::command::{RibDirection, ShowNeighborMode};
use crate::api::ApiEvent;
use crate::instance::Instance;
use crate::neighbor::{Neighbor, fsm};
use crate::packet::consts::RouteRefreshSubtype;

// ===== global functions =====

pub(crate) fn show_neighbor(
    instance: &Instance,
    mode: ShowNeighborMode,
) -> Vec<String> {
    let mut lines = Vec::new();
    for nbr in instance.neighbors.values() {
        match mode {
            ShowNeighborMode::Summary => {
                lines.push(format!(
                    "{} {} {} routes {}",
                    nbr.remote_addr,
                    nbr.config.peer_as,
                    state_name(nbr.state),
                    nbr.rib_in.len(),
                ));
            }
            ShowNeighborMode::Extensive => {
                lines.extend(show_neighbor_extensive(nbr));
            }
            ShowNeighborMode::Configuration => {
                lines.extend(show_neighbor_configuration(nbr));
            }
            ShowNeighborMode::Json => {
                // Each payload line is a complete JSON object.
                lines.push(neighbor_json(nbr).to_string());
            }
        }
    }
    lines
}

pub(crate) fn show_adj_rib(
    instance: &Instance,
    direction: RibDirection,
    extensive: bool,
) -> Vec<String> {
    let mut lines = Vec::new();
    for nbr in instance.neighbors.values() {
        match direction {
            RibDirection::In => {
                for (afi_safi, entry) in nbr.rib_in.entries() {
                    let mut line = format!(
                        "neighbor {} {} {}",
                        nbr.remote_addr, afi_safi, entry.nlri,
                    );
                    if entry.withdrawn {
                        line.push_str(" withdrawn");
                    } else if let Some(attrs) = &entry.attrs {
                        if let Some(nexthop) = attrs.value.base.nexthop {
                            line.push_str(&format!(" next-hop {}", nexthop));
                        }
                        if extensive {
                            line.push_str(&attrs_summary(&attrs.value));
                        }
                    }
                    lines.push(line);
                }
            }
            RibDirection::Out => {
                for afi_safi in bgpio_utils::bgp::AfiSafi::all() {
                    for change in nbr.rib_out.cached_changes(afi_safi) {
                        let mut line = format!(
                            "neighbor {} {} {}",
                            nbr.remote_addr,
                            afi_safi,
                            change.nlri(),
                        );
                        if let crate::rib::Change::Announce {
                            attrs, ..
                        } = change
                        {
                            if let Some(nexthop) = attrs.value.base.nexthop {
                                line.push_str(&format!(
                                    " next-hop {}",
                                    nexthop
                                ));
                            }
                            if extensive {
                                line.push_str(&attrs_summary(&attrs.value));
                            }
                        }
                        lines.push(line);
                    }
                }
            }
        }
    }
    lines
}

// Renders an event as helper-channel lines.
pub(crate) fn event_lines(event: &ApiEvent) -> Vec<String> {
    match event {
        ApiEvent::SessionState {
            addr,
            old_state,
            new_state,
        } => {
            let mut lines =
                vec![format!("neighbor {} state {}", addr, state_name(*new_state))];
            if *new_state == fsm::State::Established {
                lines.push(format!("neighbor {} up", addr));
            } else if *old_state == fsm::State::Established {
                lines.push(format!("neighbor {} down", addr));
            }
            lines
        }
        ApiEvent::Update {
            addr,
            msg,
            treat_as_withdraw,
        } => {
            let json = json!({
                "type": "receive-update",
                "neighbor": addr.to_string(),
                "treat-as-withdraw": treat_as_withdraw,
                "update": msg,
            });
            vec![json.to_string()]
        }
        ApiEvent::Eor { addr, afi_safi } => {
            vec![format!("neighbor {} eor {}", addr, afi_safi)]
        }
        ApiEvent::RouteRefresh {
            addr,
            afi_safi,
            subtype,
        } => {
            let subtype = match subtype {
                RouteRefreshSubtype::Request => "request",
                RouteRefreshSubtype::Begin => "begin",
                RouteRefreshSubtype::End => "end",
            };
            vec![format!(
                "neighbor {} route-refresh {} {}",
                addr, afi_safi, subtype
            )]
        }
        ApiEvent::Operational { addr, msg } => {
            let text = String::from_utf8_lossy(&msg.data).to_string();
            vec![format!(
                "neighbor {} operational {:?} {}",
                addr, msg.code, text
            )]
        }
        ApiEvent::ReloadRequested | ApiEvent::RestartRequested => Vec::new(),
    }
}

pub(crate) fn state_name(state: fsm::State) -> &'static str {
    match state {
        fsm::State::Idle => "idle",
        fsm::State::Active => "active",
        fsm::State::Connect => "connect",
        fsm::State::OpenSent => "opensent",
        fsm::State::OpenConfirm => "openconfirm",
        fsm::State::Established => "established",
    }
}

// ===== helper functions =====

fn show_neighbor_extensive(nbr: &Neighbor) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("neighbor {}", nbr.remote_addr));
    lines.push(format!("    state {}", state_name(nbr.state)));
    lines.push(format!("    peer-as {}", nbr.config.peer_as));
    if let Some(identifier) = nbr.identifier {
        lines.push(format!("    router-id {}", identifier));
    }
    if let Some(nego) = &nbr.nego {
        lines.push(format!("    hold-time {}", nego.holdtime));
        lines.push(format!(
            "    four-byte-as {}",
            if nego.four_byte_asn { "enabled" } else { "disabled" }
        ));
        for afi_safi in &nego.families {
            lines.push(format!("    family {}", afi_safi));
        }
    }
    if let Some((when, notification)) = &nbr.notification_rcvd {
        lines.push(format!(
            "    last-notification-received {} code {} subcode {}",
            when.to_rfc3339(),
            notification.error_code,
            notification.error_subcode
        ));
    }
    lines.push(format!(
        "    messages received {} sent {}",
        nbr.statistics
            .msgs_rcvd
            .total
            .load(std::sync::atomic::Ordering::Relaxed),
        nbr.statistics
            .msgs_sent
            .total
            .load(std::sync::atomic::Ordering::Relaxed),
    ));
    lines
}

fn show_neighbor_configuration(nbr: &Neighbor) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("neighbor {} {{", nbr.remote_addr));
    if let Some(local_as) = nbr.config.local_as {
        lines.push(format!("    local-as {};", local_as));
    }
    lines.push(format!("    peer-as {};", nbr.config.peer_as));
    if let Some(local_addr) = nbr.config.transport.local_addr {
        lines.push(format!("    local-address {};", local_addr));
    }
    lines.push(format!("    hold-time {};", nbr.config.timers.holdtime));
    if nbr.config.transport.passive_mode {
        lines.push("    passive;".to_string());
    }
    for afi_safi in nbr.config.enabled_families() {
        lines.push(format!("    family {};", afi_safi));
    }
    lines.push("}".to_string());
    lines
}

fn neighbor_json(nbr: &Neighbor) -> serde_json::Value {
    json!({
        "neighbor": nbr.remote_addr.to_string(),
        "state": state_name(nbr.state),
        "peer-as": nbr.config.peer_as,
        "router-id": nbr.identifier.map(|id| id.to_string()),
        "hold-time": nbr.nego.as_ref().map(|nego| nego.holdtime),
        "families": nbr.nego.as_ref().map(|nego| {
            nego.families
                .iter()
                .map(|afi_safi| afi_safi.to_string())
                .collect::<Vec<_>>()
        }),
        "routes": nbr.rib_in.len(),
    })
}

fn attrs_summary(attrs: &crate::packet::attribute::Attrs) -> String {
    let mut summary = String::new();
    summary.push_str(&format!(" origin {:?}", attrs.base.origin));
    if attrs.base.as_path.path_length() != 0 {
        let as_path = attrs.base.as_path.iter().join(" ");
        summary.push_str(&format!(" as-path [ {} ]", as_path));
    }
    if let Some(med) = attrs.base.med {
        summary.push_str(&format!(" med {}", med));
    }
    if let Some(local_pref) = attrs.base.local_pref {
        summary.push_str(&format!(" local-preference {}", local_pref));
    }
    if let Some(comm) = &attrs.comm {
        let comms = comm.iter().join(" ");
        summary.push_str(&format!(" community [ {} ]", comms));
    }
    summary
}
