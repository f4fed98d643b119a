//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::AfiSafi;
use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::consts::AttrType;
use crate::packet::error::AttrError;
use crate::packet::message::Message;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceCreate,
    InstanceStart,
    InstanceStop,
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    NbrAttrError(AttrType, AttrError),
    NbrCollision(&'a IpAddr, &'a fsm::State),
    NbrGrPreserved(&'a IpAddr),
    NbrEorRcvd(&'a IpAddr, AfiSafi),
    ApiClientConnect(&'a str),
    ApiClientDisconnect(&'a str),
    ApiRequest(&'a str, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate | Debug::InstanceStart
            | Debug::InstanceStop => {
                // Parent span(s): bgp-instance
                debug!("{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrAttrError(attr_type, action) => {
                // Parent span(s): bgp-instance
                debug!(?attr_type, ?action, "{}", self);
            }
            Debug::NbrCollision(addr, state) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(?state, "{}", self);
                });
            }
            Debug::NbrGrPreserved(addr) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NbrEorRcvd(addr, afi_safi) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(%afi_safi, "{}", self);
                });
            }
            Debug::ApiClientConnect(client)
            | Debug::ApiClientDisconnect(client) => {
                // Parent span(s): bgp-instance
                debug_span!("api").in_scope(|| {
                    debug!(%client, "{}", self);
                });
            }
            Debug::ApiRequest(client, line) => {
                // Parent span(s): bgp-instance
                debug_span!("api").in_scope(|| {
                    debug!(%client, %line, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::NbrAttrError(..) => {
                write!(f, "malformed attribute")
            }
            Debug::NbrCollision(..) => {
                write!(f, "connection collision")
            }
            Debug::NbrGrPreserved(..) => {
                write!(f, "graceful restart: preserving Adj-RIB-Out")
            }
            Debug::NbrEorRcvd(..) => {
                write!(f, "end-of-rib")
            }
            Debug::ApiClientConnect(..) => {
                write!(f, "client connected")
            }
            Debug::ApiClientDisconnect(..) => {
                write!(f, "client disconnected")
            }
            Debug::ApiRequest(..) => {
                write!(f, "request")
            }
        }
    }
}
