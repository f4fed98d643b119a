//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::AfiSafi;
use bgpio_utils::ip::IpAddrExt;
use bgpio_utils::socket::{TcpConnInfo, TcpStream};
use chrono::Utc;

use crate::api::ApiEvent;
use crate::debug::Debug;
use crate::error::{Error, IoError, NbrRxError};
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, Neighbors, fsm};
use crate::network;
use crate::packet::consts::{CeaseSubcode, ErrorCode, RouteRefreshSubtype};
use crate::packet::message::{
    EncodeCxt, Message, MpNextHop, NotificationMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::rib::Change;
use crate::tasks;

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };

    // Initialize the accepted stream.
    network::accepted_stream_init(
        &stream,
        nbr.remote_addr.address_family(),
        nbr.tx_ttl(),
        nbr.config.transport.ttl_security,
        nbr.config.transport.tcp_mss,
    )
    .map_err(IoError::TcpSocketError)?;

    // Connection collision resolution (RFC 4271 - Section 6.8).
    if nbr.conn_info.is_some() {
        Debug::NbrCollision(&nbr.remote_addr, &nbr.state).log();

        if !nbr.collision_keep_incoming(instance.state.router_id) {
            // Refuse the incoming connection.
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::ConnectionCollisionResolution,
            );
            let cxt = EncodeCxt {
                peer_type: nbr.peer_type,
                capabilities: Default::default(),
            };
            tasks::reject_connection(
                stream,
                Message::Notification(msg),
                cxt,
            );
            return Ok(());
        }

        // The incoming connection wins: displace the current one. A
        // connection that already progressed to OpenConfirm is refused with
        // the collision-resolution subcode; earlier attempts are dropped
        // silently.
        let msg = (nbr.state == fsm::State::OpenConfirm).then(|| {
            NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::ConnectionCollisionResolution,
            )
        });
        nbr.fsm_event(instance, fsm::Event::Stop(msg));
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info, true));

    Ok(())
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };
    nbr.tasks.connect = None;

    // An already-connected session keeps its connection; the outgoing
    // attempt is simply dropped.
    if nbr.conn_info.is_some() {
        return Ok(());
    }

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info, false));

    Ok(())
}

// ===== neighbor message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: Result<Message, NbrRxError>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Process received message.
    match msg {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();

            // Update statistics.
            nbr.statistics.msgs_rcvd.update(&msg);

            match msg {
                Message::Open(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdOpen(msg));
                }
                Message::Update(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdUpdate);
                    process_nbr_update(instance, nbr, *msg)?;
                }
                Message::Notification(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg.clone()));
                    // Keep track of the last received notification.
                    nbr.notification_rcvd = Some((Utc::now(), msg));
                }
                Message::Keepalive(_) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                }
                Message::RouteRefresh(msg) => {
                    nbr.holdtime_restart();
                    process_nbr_route_refresh(instance, nbr, msg)?;
                }
                Message::Operational(msg) => {
                    nbr.holdtime_restart();
                    let _ = instance.tx.api_event.send(
                        ApiEvent::Operational {
                            addr: nbr.remote_addr,
                            msg,
                        },
                    );
                }
            }
        }
        Err(error) => match error {
            NbrRxError::TcpConnClosed => {
                nbr.fsm_event(instance, fsm::Event::ConnFail);
            }
            NbrRxError::MsgDecodeError(error) => {
                nbr.fsm_event(instance, fsm::Event::RcvdError(error));
            }
        },
    }

    Ok(())
}

fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: UpdateMsg,
) -> Result<(), Error> {
    // End-of-RIB detection.
    if let Some(afi_safi) = msg.is_eor() {
        Debug::NbrEorRcvd(&nbr.remote_addr, afi_safi).log();
        nbr.eor_rcvd.insert(afi_safi);
        let _ = instance.tx.api_event.send(ApiEvent::Eor {
            addr: nbr.remote_addr,
            afi_safi,
        });
        return Ok(());
    }

    // RFC 7606 treat-as-withdraw: when attribute parsing failed in a
    // recoverable way the UPDATE is delivered with no attributes, and every
    // announced NLRI is downgraded to a withdrawal in the Adj-RIB-In.
    let treat_as_withdraw = msg.attrs.is_none()
        && (!msg.reach.is_empty()
            || msg
                .mp_reach
                .as_ref()
                .is_some_and(|mp_reach| !mp_reach.nlris.is_empty()));
    if treat_as_withdraw {
        nbr.statistics.erroneous_updates_withdrawn += 1;
    }

    // Process top-level (IPv4 unicast) reachability.
    for nlri in &msg.reach {
        if !nbr.is_af_negotiated(AfiSafi::Ipv4Unicast) {
            break;
        }
        if treat_as_withdraw {
            nbr.rib_in.treat_as_withdraw(nlri.clone());
            continue;
        }
        let attrs = msg.attrs.clone().unwrap();
        let attrs = instance.state.attr_sets.get(&attrs);
        nbr.rib_in.announce(nlri.clone(), attrs);
    }

    // Process multiprotocol reachability, using the next hop(s) carried
    // inside the MP_REACH_NLRI attribute.
    if let Some(mp_reach) = &msg.mp_reach
        && nbr.is_af_negotiated(mp_reach.afi_safi)
    {
        for nlri in &mp_reach.nlris {
            if treat_as_withdraw {
                nbr.rib_in.treat_as_withdraw(nlri.clone());
                continue;
            }
            let mut attrs = msg.attrs.clone().unwrap();
            attrs.base.nexthop = mp_reach.nexthop.global_addr();
            if let MpNextHop::Ipv6 {
                link_local: Some(link_local),
                ..
            } = mp_reach.nexthop
            {
                attrs.base.ll_nexthop = Some(link_local);
            }
            let attrs = instance.state.attr_sets.get(&attrs);
            nbr.rib_in.announce(nlri.clone(), attrs);
        }
    }

    // Process withdrawals.
    for nlri in &msg.unreach {
        nbr.rib_in.withdraw(nlri);
    }
    if let Some(mp_unreach) = &msg.mp_unreach {
        for nlri in &mp_unreach.nlris {
            nbr.rib_in.withdraw(nlri);
        }
    }

    // Relay the parsed UPDATE to subscribed helpers.
    let _ = instance.tx.api_event.send(ApiEvent::Update {
        addr: nbr.remote_addr,
        msg: Box::new(msg),
        treat_as_withdraw,
    });

    Ok(())
}

fn process_nbr_route_refresh(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: RouteRefreshMsg,
) -> Result<(), Error> {
    let Some(afi_safi) = AfiSafi::from_pair(msg.afi, msg.safi) else {
        // Ignore unknown address family.
        return Ok(());
    };

    // RFC 2918 - Section 4:
    // If a BGP speaker receives from its peer a ROUTE-REFRESH message with
    // the <AFI, SAFI> that the speaker didn't advertise to the peer at the
    // session establishment time via capability advertisement, the speaker
    // shall ignore such a message.
    if !nbr.is_af_negotiated(afi_safi) {
        return Ok(());
    }

    match msg.subtype {
        RouteRefreshSubtype::Request => {
            // Re-queue the cached Adj-RIB-Out for the requested family.
            nbr.rib_out.refresh(afi_safi);

            let enhanced = nbr
                .nego
                .as_ref()
                .is_some_and(|nego| nego.enhanced_route_refresh);

            let mut msg_list = Vec::new();
            if enhanced {
                msg_list.push(Message::RouteRefresh(RouteRefreshMsg {
                    afi: msg.afi,
                    safi: msg.safi,
                    subtype: RouteRefreshSubtype::Begin,
                }));
            }
            msg_list.extend(nbr.build_pending_updates());
            if enhanced {
                msg_list.push(Message::RouteRefresh(RouteRefreshMsg {
                    afi: msg.afi,
                    safi: msg.safi,
                    subtype: RouteRefreshSubtype::End,
                }));
            }
            if !msg_list.is_empty() {
                nbr.message_list_send(msg_list);
            }
        }
        RouteRefreshSubtype::Begin | RouteRefreshSubtype::End => {
            // Enhanced refresh demarcation from the peer; only relayed to
            // helpers.
            let _ = instance.tx.api_event.send(ApiEvent::RouteRefresh {
                addr: nbr.remote_addr,
                afi_safi,
                subtype: msg.subtype,
            });
        }
    }

    Ok(())
}

// ===== neighbor expired timeout =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    timer: fsm::Timer,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Timer(timer));

    Ok(())
}

// ===== API-injected changes =====

// Applies an API-submitted change to every selected neighbor.
pub(crate) fn process_api_change(
    neighbors: &mut Neighbors,
    targets: &[IpAddr],
    change: Change,
) {
    for addr in targets {
        if let Some(nbr) = neighbors.get_mut(addr) {
            nbr.queue_change(change.clone());
        }
    }
}
