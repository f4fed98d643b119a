//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod command;
pub mod control;
pub mod encoder;

use std::net::IpAddr;

use bgpio_utils::UnboundedSender;
use bgpio_utils::bgp::AfiSafi;

use crate::debug::Debug;
use crate::instance::Instance;
use crate::neighbor::fsm;
use crate::packet::consts::RouteRefreshSubtype;
use crate::packet::message::{
    Message, OperationalMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::rib::Change;

pub use crate::api::command::{ApiCommand, NeighborSelector, ShowNeighborMode};

// A command line submitted by a helper or control-socket client.
#[derive(Debug)]
pub struct ApiRequest {
    pub client_id: u64,
    pub request_id: Option<String>,
    pub line: String,
    pub reply_tx: UnboundedSender<ApiResponse>,
}

// The response to a single command: payload lines plus the success flag
// that selects the `done`/`error` terminator.
#[derive(Debug)]
pub struct ApiResponse {
    pub client_id: u64,
    pub request_id: Option<String>,
    pub lines: Vec<String>,
    pub ok: bool,
}

// Session and routing events relayed to subscribed helpers.
#[derive(Debug)]
pub enum ApiEvent {
    SessionState {
        addr: IpAddr,
        old_state: fsm::State,
        new_state: fsm::State,
    },
    Update {
        addr: IpAddr,
        msg: Box<UpdateMsg>,
        treat_as_withdraw: bool,
    },
    Eor {
        addr: IpAddr,
        afi_safi: AfiSafi,
    },
    RouteRefresh {
        addr: IpAddr,
        afi_safi: AfiSafi,
        subtype: RouteRefreshSubtype,
    },
    Operational {
        addr: IpAddr,
        msg: OperationalMsg,
    },
    ReloadRequested,
    RestartRequested,
}

// ===== global functions =====

// Parses and executes one API request, sending the response back to the
// control server. Parse errors produce a single `error` response and never
// reset any BGP session.
pub(crate) fn process_request(instance: &mut Instance, request: ApiRequest) {
    Debug::ApiRequest(&request.client_id.to_string(), &request.line).log();

    let (lines, ok) = match command::parse(&request.line) {
        Ok(cmd) => dispatch(instance, cmd),
        Err(reason) => (vec![reason], false),
    };

    let response = ApiResponse {
        client_id: request.client_id,
        request_id: request.request_id,
        lines,
        ok,
    };
    let _ = request.reply_tx.send(response);
}

// Executes a parsed command against the instance.
fn dispatch(
    instance: &mut Instance,
    cmd: ApiCommand,
) -> (Vec<String>, bool) {
    match cmd {
        ApiCommand::AnnounceRoutes { selector, routes } => {
            let Some((view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            for (nlri, attrs, split) in routes {
                let attrs = view.state.attr_sets.get(&attrs);
                let change = Change::Announce { nlri, attrs, split };
                crate::events::process_api_change(
                    neighbors, &targets, change,
                );
            }
            (Vec::new(), true)
        }
        ApiCommand::WithdrawRoutes { selector, nlris } => {
            let Some((_view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            for nlri in nlris {
                let change = Change::Withdraw { nlri };
                crate::events::process_api_change(
                    neighbors, &targets, change,
                );
            }
            (Vec::new(), true)
        }
        ApiCommand::AnnounceEor { selector, afi_safi } => {
            let Some((_view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            for addr in targets {
                let nbr = neighbors.get_mut(&addr).unwrap();
                if nbr.state == fsm::State::Established
                    && nbr.is_af_negotiated(afi_safi)
                {
                    let msg =
                        Message::Update(Box::new(UpdateMsg::eor(afi_safi)));
                    nbr.message_send(msg);
                }
            }
            (Vec::new(), true)
        }
        ApiCommand::AnnounceRouteRefresh { selector, afi_safi } => {
            let Some((_view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            for addr in targets {
                let nbr = neighbors.get_mut(&addr).unwrap();
                let refresh_ok = nbr
                    .nego
                    .as_ref()
                    .is_some_and(|nego| nego.route_refresh);
                if nbr.state == fsm::State::Established
                    && refresh_ok
                    && nbr.is_af_negotiated(afi_safi)
                {
                    let msg = Message::RouteRefresh(
                        RouteRefreshMsg::request(afi_safi),
                    );
                    nbr.message_send(msg);
                }
            }
            (Vec::new(), true)
        }
        ApiCommand::AnnounceOperational { selector, msg } => {
            let Some((_view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            let mut sent = false;
            for addr in targets {
                let nbr = neighbors.get_mut(&addr).unwrap();
                let operational = nbr
                    .nego
                    .as_ref()
                    .is_some_and(|nego| nego.operational);
                if nbr.state == fsm::State::Established && operational {
                    nbr.message_send(Message::Operational(msg.clone()));
                    sent = true;
                }
            }
            if sent {
                (Vec::new(), true)
            } else {
                (
                    vec![
                        "no established neighbor negotiated the operational capability"
                            .to_string(),
                    ],
                    false,
                )
            }
        }
        ApiCommand::ShowNeighbor { mode } => {
            let lines = encoder::show_neighbor(instance, mode);
            (lines, true)
        }
        ApiCommand::ShowAdjRib { direction, extensive } => {
            let lines =
                encoder::show_adj_rib(instance, direction, extensive);
            (lines, true)
        }
        ApiCommand::FlushAdjRibOut { selector } => {
            let Some((_view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            for addr in targets {
                let nbr = neighbors.get_mut(&addr).unwrap();
                if nbr.state != fsm::State::Established {
                    continue;
                }
                nbr.rib_out.requeue_cache();
                let msg_list = nbr.build_pending_updates();
                if !msg_list.is_empty() {
                    nbr.message_list_send(msg_list);
                }
            }
            (Vec::new(), true)
        }
        ApiCommand::Teardown { selector, code } => {
            let Some((mut view, neighbors)) = instance.as_up() else {
                return (vec!["instance not active".to_string()], false);
            };
            let targets = selector.select(neighbors);
            if targets.is_empty() {
                return (vec!["no matching neighbor".to_string()], false);
            }
            for addr in targets {
                let nbr = neighbors.get_mut(&addr).unwrap();
                nbr.teardown(&mut view, code);
            }
            (Vec::new(), true)
        }
        ApiCommand::Reload => {
            let _ = instance.tx.api_event.send(ApiEvent::ReloadRequested);
            (vec!["reload in progress".to_string()], true)
        }
        ApiCommand::Restart => {
            let _ = instance.tx.api_event.send(ApiEvent::RestartRequested);
            (vec!["restart in progress".to_string()], true)
        }
        ApiCommand::Shutdown => {
            instance.shutdown = true;
            (vec!["shutdown in progress".to_string()], true)
        }
        ApiCommand::Version => {
            let version =
                format!("bgpio {}", env!("CARGO_PKG_VERSION"));
            (vec![version], true)
        }
        ApiCommand::Help => (
            command::HELP
                .iter()
                .map(|line| line.to_string())
                .collect(),
            true,
        ),
    }
}
