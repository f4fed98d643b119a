//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use bgpio_utils::ip::AddressFamily;
use bgpio_utils::socket::TcpListener;
use bgpio_utils::task::Task;
use bgpio_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::api::{ApiEvent, ApiRequest};
use crate::config::{InstanceCfg, NeighborCfg};
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::neighbor::{Neighbor, Neighbors, fsm};
use crate::rib::AttrSets;
use crate::tasks;
use crate::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, TcpAcceptMsg, TcpConnectMsg,
};
use crate::tasks::messages::ProtocolInputMsg;
#[cfg(feature = "testing")]
use crate::tasks::messages::ProtocolOutputMsg;
use crate::{api, events};

#[derive(Debug)]
pub struct Instance {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance neighbors.
    pub neighbors: Neighbors,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
    // Shutdown requested through the API.
    pub shutdown: bool,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // TCP listening sockets.
    pub listening_sockets: Vec<TcpListenerTask>,
    // Control-socket server.
    pub control_task: Option<Task<()>>,
    // Attribute set interning context shared by all neighbors.
    pub attr_sets: AttrSets,
}

#[derive(Debug)]
pub struct TcpListenerTask {
    pub af: AddressFamily,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    pub protocol_input: ProtocolInputChannelsTx,
    pub api_event: UnboundedSender<ApiEvent>,
    #[cfg(feature = "testing")]
    pub protocol_output: Sender<ProtocolOutputMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Sender<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Sender<NbrTimerMsg>,
    // API request.
    pub api_request: UnboundedSender<ApiRequest>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    // TCP accept event.
    pub tcp_accept: Receiver<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Receiver<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Receiver<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Receiver<NbrTimerMsg>,
    // API request.
    pub api_request: UnboundedReceiver<ApiRequest>,
}

// Operational view of an active instance.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
}

// ===== impl Instance =====

impl Instance {
    // Creates a new BGP instance together with its input channel receivers
    // and the API event receiver consumed by the control server.
    pub fn new(
        name: String,
        config: InstanceCfg,
    ) -> (Instance, ProtocolInputChannelsRx, UnboundedReceiver<ApiEvent>) {
        Debug::InstanceCreate.log();

        let (tx, rx, api_event_rx) = instance_channels();
        let instance = Instance {
            name,
            config,
            state: None,
            neighbors: Default::default(),
            tx,
            shutdown: false,
        };

        (instance, rx, api_event_rx)
    }

    // Adds a configured neighbor.
    pub fn add_neighbor(&mut self, remote_addr: IpAddr, config: NeighborCfg) {
        let local_as = config.local_as.unwrap_or(self.config.asn);
        let nbr = Neighbor::new(remote_addr, config, local_as);
        self.neighbors.insert(remote_addr, nbr);
    }

    // Starts the BGP instance and runs its event loop until shutdown.
    pub async fn run(
        mut self,
        mut rx: ProtocolInputChannelsRx,
        api_event_rx: UnboundedReceiver<ApiEvent>,
    ) {
        if let Err(error) = self.start(api_event_rx) {
            Error::InstanceStartError(Box::new(error)).log();
            return;
        }

        // Start configured neighbors.
        let (mut instance, neighbors) = self.as_up().unwrap();
        for nbr in neighbors.values_mut() {
            if nbr.config.enabled {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
        }

        // Event loop.
        while !self.shutdown {
            tokio::select! {
                biased;
                msg = rx.tcp_accept.recv() => {
                    let Some(msg) = msg else { break };
                    self.process_protocol_msg(ProtocolInputMsg::TcpAccept(msg));
                }
                msg = rx.tcp_connect.recv() => {
                    let Some(msg) = msg else { break };
                    self.process_protocol_msg(ProtocolInputMsg::TcpConnect(msg));
                }
                msg = rx.nbr_msg_rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.process_protocol_msg(ProtocolInputMsg::NbrRx(msg));
                }
                msg = rx.nbr_timer.recv() => {
                    let Some(msg) = msg else { break };
                    self.process_protocol_msg(ProtocolInputMsg::NbrTimer(msg));
                }
                request = rx.api_request.recv() => {
                    let Some(request) = request else { break };
                    self.process_api_request(request);
                }
            }
        }

        self.stop();
    }

    // Starts the BGP instance.
    fn start(
        &mut self,
        api_event_rx: UnboundedReceiver<ApiEvent>,
    ) -> Result<(), Error> {
        Debug::InstanceStart.log();

        let Some(router_id) = self.config.identifier else {
            return Err(Error::IoError(IoError::TcpSocketError(
                std::io::Error::other("missing router-id"),
            )));
        };

        let mut listening_sockets = Vec::new();

        // Create TCP listeners.
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            let socket = crate::network::listen_socket(af)
                .map(Arc::new)
                .map_err(|error| {
                    Error::from(IoError::TcpSocketError(error))
                })?;
            let task = tasks::tcp_listener(
                &socket,
                &self.tx.protocol_input.tcp_accept,
            );
            listening_sockets.push(TcpListenerTask {
                af,
                socket,
                _task: task,
            });
        }

        // Register TCP-MD5 keys for configured neighbors.
        for (addr, nbr) in &self.neighbors {
            if let Some(key) = &nbr.config.transport.md5_key {
                for listener in &listening_sockets {
                    crate::network::listen_socket_md5sig_update(
                        &listener.socket,
                        addr,
                        Some(key),
                    );
                }
            }
        }

        // Start the control-socket server.
        let control_task = self.config.api.socket_path.as_ref().map(|path| {
            api::control::server(
                path.clone(),
                self.tx.protocol_input.api_request.clone(),
                api_event_rx,
            )
        });

        self.state = Some(InstanceState {
            router_id,
            listening_sockets,
            control_task,
            attr_sets: Default::default(),
        });

        Ok(())
    }

    // Stops the BGP instance.
    fn stop(&mut self) {
        if self.state.is_none() {
            return;
        }

        Debug::InstanceStop.log();

        // Stop neighbors.
        let (mut instance, neighbors) = self.as_up().unwrap();
        for nbr in neighbors.values_mut() {
            nbr.stop(&mut instance);
        }

        // Clear instance state.
        self.state = None;
    }

    // Returns a view struct for the instance if it is operational.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut Neighbors)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.neighbors))
        } else {
            None
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, neighbors)) = self.as_up()
            && let Err(error) =
                process_protocol_msg(&mut instance, neighbors, msg)
        {
            error.log();
        }
    }

    fn process_api_request(&mut self, request: ApiRequest) {
        api::process_request(self, request);
    }
}

// ===== impl InstanceUpView =====

impl InstanceUpView<'_> {
    // Emits a session-state event on the helper channel.
    pub(crate) fn notify_session_state(
        &self,
        addr: IpAddr,
        old_state: fsm::State,
        new_state: fsm::State,
    ) {
        let _ = self.tx.api_event.send(ApiEvent::SessionState {
            addr,
            old_state,
            new_state,
        });
    }
}

// ===== helper functions =====

fn instance_channels() -> (
    InstanceChannelsTx,
    ProtocolInputChannelsRx,
    UnboundedReceiver<ApiEvent>,
) {
    let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
    let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
    let (nbr_msg_rxp, nbr_msg_rxc) = mpsc::channel(4);
    let (nbr_timerp, nbr_timerc) = mpsc::channel(4);
    let (api_requestp, api_requestc) = mpsc::unbounded_channel();
    let (api_eventp, api_eventc) = mpsc::unbounded_channel();
    #[cfg(feature = "testing")]
    let (proto_outputp, _proto_outputc) = mpsc::channel(64);

    let tx = InstanceChannelsTx {
        protocol_input: ProtocolInputChannelsTx {
            tcp_accept: tcp_acceptp,
            tcp_connect: tcp_connectp,
            nbr_msg_rx: nbr_msg_rxp,
            nbr_timer: nbr_timerp,
            api_request: api_requestp,
        },
        api_event: api_eventp,
        #[cfg(feature = "testing")]
        protocol_output: proto_outputp,
    };
    let rx = ProtocolInputChannelsRx {
        tcp_accept: tcp_acceptc,
        tcp_connect: tcp_connectc,
        nbr_msg_rx: nbr_msg_rxc,
        nbr_timer: nbr_timerc,
        api_request: api_requestc,
    };

    (tx, rx, api_eventc)
}

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Accepted TCP connection request.
        ProtocolInputMsg::TcpAccept(mut msg) => {
            events::process_tcp_accept(
                instance,
                neighbors,
                msg.stream(),
                msg.conn_info,
            )?;
        }
        // Established TCP connection.
        ProtocolInputMsg::TcpConnect(mut msg) => {
            events::process_tcp_connect(
                instance,
                neighbors,
                msg.stream(),
                msg.conn_info,
            )?;
        }
        // Received message from neighbor.
        ProtocolInputMsg::NbrRx(msg) => {
            events::process_nbr_msg(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.msg,
            )?;
        }
        // Neighbor's timeout has expired.
        ProtocolInputMsg::NbrTimer(msg) => {
            events::process_nbr_timer(
                instance,
                neighbors,
                msg.nbr_addr,
                msg.timer,
            )?;
        }
    }

    Ok(())
}
