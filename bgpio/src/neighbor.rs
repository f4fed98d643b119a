//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32};

use bgpio_utils::bgp::AfiSafi;
use bgpio_utils::socket::{TTL_MAX, TcpConnInfo, TcpStream};
use bgpio_utils::task::{IntervalTask, Task, TimeoutTask};
use bgpio_utils::{Sender, UnboundedSender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::NeighborCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::consts::{
    AS_TRANS, AddPathMode, BGP_VERSION, CeaseSubcode, ErrorCode,
    FsmErrorSubcode, GR_RESTART_STATE_FLAG,
};
use crate::packet::message::{
    AddPathTuple, Capability, DecodeCxt, EncodeCxt, KeepaliveMsg, Message,
    NegotiatedCapability, NotificationMsg, OpenMsg, UpdateMsg,
};
use crate::rib::{AdjRibIn, AdjRibOut, Change};
use crate::tasks;
use crate::tasks::messages::input::{NbrTimerMsg, TcpConnectMsg};
use crate::tasks::messages::output::NbrTxMsg;

// Initial and maximum Idle-state restart backoff, in seconds.
const BACKOFF_MIN: u16 = 1;
const BACKOFF_MAX: u16 = 32;

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    // Set when the live connection was initiated by the remote end;
    // consulted during collision resolution.
    pub conn_incoming: bool,
    pub identifier: Option<Ipv4Addr>,
    pub nego: Option<Negotiated>,
    pub capabilities_adv: BTreeSet<Capability>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub notification_sent: Option<(DateTime<Utc>, NotificationMsg)>,
    pub notification_rcvd: Option<(DateTime<Utc>, NotificationMsg)>,
    pub last_established: Option<DateTime<Utc>>,
    pub rib_in: AdjRibIn,
    pub rib_out: AdjRibOut,
    // End-of-RIB markers received from the peer.
    pub eor_rcvd: BTreeSet<AfiSafi>,
    // Graceful restart: re-advertise the preserved Adj-RIB-Out and set the
    // restart-state flag on the next OPEN.
    pub gr_restarting: bool,
    // Idle-state restart backoff.
    pub backoff: u16,
    // Outbound connection attempts since the last established session.
    pub connect_attempts: u32,
    // Terminal shutdown: no further restarts.
    pub terminal: bool,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub msg_txp: Option<UnboundedSender<NbrTxMsg>>,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
    pub erroneous_updates_withdrawn: u32,
}

// Inbound and outbound message counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub total: Arc<AtomicU32>,
    pub updates: u32,
    pub notifications: u32,
    pub route_refreshes: u32,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub open_wait: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
}

// Session state negotiated from the two OPEN messages. Computed once per
// session, immutable afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Negotiated {
    pub capabilities: BTreeSet<NegotiatedCapability>,
    pub four_byte_asn: bool,
    pub families: Vec<AfiSafi>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<GrNegotiated>,
    pub operational: bool,
    pub holdtime: u16,
    pub keepalive: u16,
    pub remote_as: u32,
    pub remote_identifier: Ipv4Addr,
}

// Remote graceful-restart state from the received OPEN (RFC 4724).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GrNegotiated {
    pub flags: u8,
    pub restart_time: u16,
    pub families: Vec<(AfiSafi, u8)>,
}

// Type aliases.
pub type Neighbors = std::collections::BTreeMap<IpAddr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use bgpio_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Active,
        Connect,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The original RFC FSM events are listed above each event for clarity.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        // ManualStart_with_PassiveTcpEstablishment
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo, bool),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr
        // BGPOpenMsgErr
        // UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // AutomaticStart
        // AutomaticStart_with_PassiveTcpEstablishment
        Timer(Timer),
    }

    // BGP timers.
    //
    // Note: KEEPALIVE messages are sent independently, separate from the FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        OpenWait,
        AutoStart,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub fn new(
        remote_addr: IpAddr,
        config: NeighborCfg,
        local_as: u32,
    ) -> Neighbor {
        let peer_type = if config.peer_as == local_as {
            PeerType::Internal
        } else {
            PeerType::External
        };

        Neighbor {
            remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            conn_incoming: false,
            identifier: None,
            nego: None,
            capabilities_adv: Default::default(),
            capabilities_rcvd: Default::default(),
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            rib_in: Default::default(),
            rib_out: Default::default(),
            eor_rcvd: Default::default(),
            gr_restarting: false,
            backoff: BACKOFF_MIN,
            connect_attempts: 0,
            terminal: false,
            statistics: Default::default(),
            tasks: Default::default(),
            msg_txp: None,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        // Process FSM event.
        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::AutoStart) => {
                    if self.terminal {
                        None
                    } else if self.config.transport.passive_mode {
                        Some(fsm::State::Active)
                    } else {
                        self.connect_retry_start(
                            &instance.tx.protocol_input.nbr_timer,
                        );
                        self.connect(&instance.tx.protocol_input.tcp_connect);
                        Some(fsm::State::Connect)
                    }
                }
                // Passive open: an incoming connection revives an idle
                // session (including the connection-replacement half of
                // collision resolution).
                fsm::Event::Connected(stream, conn_info, incoming) => {
                    self.connection_setup(
                        stream,
                        conn_info,
                        incoming,
                        instance,
                    );
                    self.open_send(instance);
                    self.open_wait_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                _ => None,
            },
            // Active state (passive peers waiting for an inbound connection)
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(_) => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info, incoming) => {
                    self.connect_retry_stop();
                    self.connection_setup(
                        stream,
                        conn_info,
                        incoming,
                        instance,
                    );
                    self.open_send(instance);
                    self.open_wait_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Connect)
                }
                _ => {
                    // FSM error.
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(_) => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info, incoming) => {
                    self.connect_retry_stop();
                    self.connection_setup(
                        stream,
                        conn_info,
                        incoming,
                        instance,
                    );
                    self.open_send(instance);
                    self.open_wait_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(&instance.tx.protocol_input.tcp_connect);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    None
                }
                _ => {
                    // FSM error.
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(None);
                    self.connect_retry_start(
                        &instance.tx.protocol_input.nbr_timer,
                    );
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    let next_state = self.open_process(instance, msg);
                    Some(next_state)
                }
                fsm::Event::Timer(fsm::Timer::OpenWait) => {
                    // The peer never sent its OPEN; no NOTIFICATION is due
                    // since the BGP session was not synchronized yet.
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                // Stale timers from the previous state may still be queued.
                fsm::Event::Timer(fsm::Timer::ConnectRetry)
                | fsm::Event::Timer(fsm::Timer::AutoStart) => None,
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInOpenSent;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                // Stale timers from the previous state may still be queued.
                fsm::Event::Timer(fsm::Timer::OpenWait)
                | fsm::Event::Timer(fsm::Timer::ConnectRetry)
                | fsm::Event::Timer(fsm::Timer::AutoStart) => None,
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let error_code = ErrorCode::HoldTimerExpired;
                    let error_subcode = 0;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                // Stale timers from the previous state may still be queued.
                fsm::Event::Timer(fsm::Timer::OpenWait)
                | fsm::Event::Timer(fsm::Timer::ConnectRetry)
                | fsm::Event::Timer(fsm::Timer::AutoStart) => None,
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let error_code = ErrorCode::HoldTimerExpired;
                    let error_subcode = 0;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    // FSM error.
                    let error_code = ErrorCode::FiniteStateMachineError;
                    let error_subcode =
                        FsmErrorSubcode::UnexpectedMessageInEstablished;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    self.session_close(Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Change to next FSM state when applicable.
        if let Some(next_state) = next_state
            && self.state != next_state
        {
            // Schedule auto-start unless the peer has been disabled or shut
            // down for good.
            if next_state == fsm::State::Idle
                && self.config.enabled
                && !self.terminal
                && !self.config.once
            {
                self.autostart_start(&instance.tx.protocol_input.nbr_timer);
            } else {
                self.autostart_stop();
            }

            self.fsm_state_change(instance, next_state);
        }
    }

    // Updates the neighbor's FSM state.
    fn fsm_state_change(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        next_state: fsm::State,
    ) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &next_state)
            .log();

        // Keep track of the time that the BGP session last transitioned in or
        // out of the Established state.
        if self.state == fsm::State::Established
            || next_state == fsm::State::Established
        {
            self.last_established = Some(Utc::now());
        }

        if next_state == fsm::State::Established {
            // Update statistics and reset the restart backoff.
            self.statistics.established_transitions += 1;
            self.backoff = BACKOFF_MIN;
            self.connect_attempts = 0;

            // Initialize session.
            self.session_init(instance);
        }

        let old_state = self.state;
        self.state = next_state;

        // Notify subscribed helpers about the session transition.
        instance.notify_session_state(
            self.remote_addr,
            old_state,
            next_state,
        );
    }

    // Sets up the connection for the BGP neighbor, spawning necessary tasks
    // for TCP communication.
    fn connection_setup(
        &mut self,
        stream: TcpStream,
        conn_info: TcpConnInfo,
        incoming: bool,
        instance: &mut InstanceUpView<'_>,
    ) {
        // Store TCP connection information.
        self.conn_info = Some(conn_info);
        self.conn_incoming = incoming;

        // The locally advertised capabilities drive both directions of the
        // codec once the remote OPEN arrives.
        let local_caps = self.build_capabilities(instance);
        self.capabilities_adv.clone_from(&local_caps);

        // Split TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx task.
        let (msg_txp, msg_txc) = mpsc::unbounded_channel();
        let cxt = EncodeCxt {
            peer_type: self.peer_type,
            capabilities: Default::default(),
        };
        let mut tx_task = tasks::nbr_tx(
            self,
            cxt,
            write_half,
            msg_txc,
            #[cfg(feature = "testing")]
            &instance.tx.protocol_output,
        );
        self.msg_txp = Some(msg_txp);

        // Spawn neighbor TCP Rx task.
        let cxt = DecodeCxt::new(self.peer_type, self.config.peer_as);
        let tcp_rx_task = tasks::nbr_rx(
            self,
            cxt,
            local_caps,
            read_half,
            &instance.tx.protocol_input.nbr_msg_rx,
        );
        self.tasks.tcp_rx = Some(tcp_rx_task);

        // No need to keep track of the Tx task since it gracefully exits as
        // soon as the tx end of its mpsc channel is dropped. This ensures that
        // messages sent during neighbor shutdown will be delivered.
        tx_task.detach();
    }

    // Initializes the BGP session once it reaches Established.
    fn session_init(&mut self, _instance: &mut InstanceUpView<'_>) {
        let Some(nego) = &self.nego else {
            return;
        };
        let capabilities = nego.capabilities.clone();
        let families = nego.families.clone();

        // Update the Tx task with the negotiated capabilities.
        let msg = NbrTxMsg::UpdateCapabilities(capabilities);
        let _ = self.msg_txp.as_ref().unwrap().send(msg);

        // After a graceful restart, re-advertise the preserved Adj-RIB-Out.
        if self.gr_restarting {
            self.rib_out.requeue_cache();
            self.gr_restarting = false;
        }

        // Send the initial routing update followed by the per-family
        // End-of-RIB markers.
        let mut msg_list = self.build_pending_updates();
        for afi_safi in families {
            msg_list
                .push(Message::Update(Box::new(UpdateMsg::eor(afi_safi))));
        }
        if !msg_list.is_empty() {
            self.message_list_send(msg_list);
        }
    }

    // Closes the BGP session, performing necessary cleanup and releasing
    // resources.
    pub(crate) fn session_close(
        &mut self,
        send_notif: Option<NotificationMsg>,
    ) {
        // When graceful restart was negotiated in both directions, a session
        // drop keeps the cached Adj-RIB-Out for re-advertisement and sends
        // no NOTIFICATION.
        let graceful = self.state == fsm::State::Established
            && send_notif.is_none()
            && self
                .nego
                .as_ref()
                .is_some_and(|nego| nego.graceful_restart.is_some());

        // Send a notification message.
        if !graceful
            && self.state >= fsm::State::OpenSent
            && let Some(msg) = send_notif
        {
            self.message_send(Message::Notification(msg));
        }

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Release all resources.
        self.conn_info = None;
        self.conn_incoming = false;
        self.identifier = None;
        self.nego = None;
        self.capabilities_adv.clear();
        self.capabilities_rcvd.clear();
        self.eor_rcvd.clear();
        self.rib_in.clear();
        if graceful {
            Debug::NbrGrPreserved(&self.remote_addr).log();
            self.rib_out.preserve_cache();
            self.gr_restarting = true;
        } else {
            self.rib_out.clear();
        }
        self.tasks = Default::default();
        self.msg_txp = None;
    }

    // Requests a clean session shutdown with a Cease NOTIFICATION.
    pub(crate) fn teardown(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        subcode: u8,
    ) {
        let msg = NotificationMsg {
            error_code: ErrorCode::Cease as u8,
            error_subcode: subcode,
            data: Vec::new(),
        };
        self.fsm_event(instance, fsm::Event::Stop(Some(msg)));
    }

    // Requests a terminal shutdown: the session is closed and never
    // restarted.
    pub(crate) fn stop(&mut self, instance: &mut InstanceUpView<'_>) {
        self.terminal = true;
        let msg = NotificationMsg::new(
            ErrorCode::Cease,
            CeaseSubcode::AdministrativeShutdown,
        );
        self.fsm_event(instance, fsm::Event::Stop(Some(msg)));
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent.update(&msg);

        // Keep track of the last sent notification.
        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some((Utc::now(), msg.clone()));
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        let nbr_addr = self.remote_addr;
        let msg = NbrTxMsg::SendMessage { nbr_addr, msg };
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }
    }

    // Enqueues a list of BGP messages for transmission.
    //
    // This method is more efficient for handling a large number of messages,
    // as they are sent all at once.
    pub(crate) fn message_list_send(&mut self, msg_list: Vec<Message>) {
        for msg in &msg_list {
            Debug::NbrMsgTx(&self.remote_addr, msg).log();

            // Update statistics.
            self.statistics.msgs_sent.update(msg);

            // Keep track of the last sent notification.
            if let Message::Notification(msg) = &msg {
                self.notification_sent = Some((Utc::now(), msg.clone()));
            }
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        let nbr_addr = self.remote_addr;
        let msg = NbrTxMsg::SendMessageList { nbr_addr, msg_list };
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }
    }

    // Drains the outgoing queue into UPDATE messages.
    pub(crate) fn build_pending_updates(&mut self) -> Vec<Message> {
        let Some(nego) = &self.nego else {
            return Vec::new();
        };
        let cxt = EncodeCxt {
            peer_type: self.peer_type,
            capabilities: nego.capabilities.clone(),
        };

        let mut msgs = Vec::new();
        for afi_safi in self.rib_out.pending_families() {
            // Only negotiated families are transmitted.
            if !nego.families.contains(&afi_safi) {
                continue;
            }
            let changes = self.rib_out.take_queued(afi_safi);
            msgs.extend(crate::rib::generate_updates(
                afi_safi,
                changes,
                &cxt,
                self.remote_addr,
            ));
        }
        msgs
    }

    // Queues a change and transmits the resulting UPDATEs if the session is
    // established.
    pub(crate) fn queue_change(&mut self, change: Change) {
        self.rib_out.queue(change);
        if self.state == fsm::State::Established {
            let msg_list = self.build_pending_updates();
            if !msg_list.is_empty() {
                self.message_list_send(msg_list);
            }
        }
    }

    // Builds the local capability set advertised in the OPEN message.
    fn build_capabilities(
        &self,
        instance: &InstanceUpView<'_>,
    ) -> BTreeSet<Capability> {
        let local_as = self.config.local_as.unwrap_or(instance.config.asn);

        // Base capabilities.
        let mut capabilities: BTreeSet<_> = [
            Capability::RouteRefresh,
            Capability::EnhancedRouteRefresh,
            Capability::ExtendedMessage,
            Capability::FourOctetAsNumber { asn: local_as },
        ]
        .into();

        // Multiprotocol capabilities.
        for afi_safi in self.config.enabled_families() {
            capabilities.insert(Capability::MultiProtocol { afi_safi });
        }

        // Add-path capability.
        let mut tuples = BTreeSet::new();
        for (afi_safi, cfg) in &self.config.afi_safi {
            if !cfg.enabled || !afi_safi.addpath_capable() {
                continue;
            }
            let mode = match (cfg.addpath_tx, cfg.addpath_rx) {
                (true, true) => Some(AddPathMode::ReceiveSend),
                (true, false) => Some(AddPathMode::Send),
                (false, true) => Some(AddPathMode::Receive),
                (false, false) => None,
            };
            if let Some(mode) = mode {
                tuples.insert(AddPathTuple {
                    afi_safi: *afi_safi,
                    mode,
                });
            }
        }
        if !tuples.is_empty() {
            capabilities.insert(Capability::AddPath(tuples));
        }

        // Graceful restart capability. The restart-state flag is raised on
        // every reconnect after an established session.
        if self.config.graceful_restart.enabled {
            let mut flags = 0;
            if self.gr_restarting {
                flags |= GR_RESTART_STATE_FLAG;
            }
            let families = self
                .config
                .enabled_families()
                .map(|afi_safi| (afi_safi, 0))
                .collect();
            capabilities.insert(Capability::GracefulRestart {
                flags,
                restart_time: self.config.graceful_restart.restart_time,
                families,
            });
        }

        // Operational-message capability.
        if self.config.operational {
            capabilities.insert(Capability::Operational);
        }

        capabilities
    }

    // Sends a BGP OPEN message based on the local configuration.
    fn open_send(&mut self, instance: &mut InstanceUpView<'_>) {
        let local_as = self.config.local_as.unwrap_or(instance.config.asn);

        // Fill-in and send message.
        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: local_as.try_into().unwrap_or(AS_TRANS),
            holdtime: self.config.timers.holdtime,
            identifier: instance.state.router_id,
            capabilities: self.capabilities_adv.clone(),
        });
        self.message_send(msg);
    }

    // Processes the received OPEN message while in the OpenSent state.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        use crate::packet::consts::OpenMessageErrorSubcode as ErrorSubcode;

        // Validate the received message.
        if let Err(error) = self.open_validate(instance, &msg) {
            error.log();

            // Close the session.
            let msg = match error {
                Error::NbrBadAs(..) => {
                    let error_code = ErrorCode::OpenMessageError;
                    let error_subcode = ErrorSubcode::BadPeerAs;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    Some(msg)
                }
                Error::NbrBadIdentifier(..) => {
                    let error_code = ErrorCode::OpenMessageError;
                    let error_subcode = ErrorSubcode::BadBgpIdentifier;
                    let msg = NotificationMsg::new(error_code, error_subcode);
                    Some(msg)
                }
                _ => None,
            };
            self.session_close(msg);

            // Transition to the Idle state.
            return fsm::State::Idle;
        }

        // Build the negotiated session state.
        let nego = Negotiated::build(
            &self.capabilities_adv,
            &msg,
            self.config.timers.holdtime,
        );

        // Stop the open-wait watchdog and the connect retry timer.
        self.open_wait_stop();
        self.connect_retry_stop();

        // Send Keepalive message.
        self.message_send(Message::Keepalive(KeepaliveMsg {}));

        // Start Keepalive interval and session hold timer.
        if nego.holdtime != 0 {
            self.keepalive_interval_start(nego.keepalive);
            self.holdtime_start(
                nego.holdtime,
                &instance.tx.protocol_input.nbr_timer,
            );
        } else {
            self.holdtime_stop();
        }

        // Keep track of the received data.
        self.identifier = Some(msg.identifier);
        self.capabilities_rcvd = msg.capabilities.clone();
        self.nego = Some(nego);

        // Transition to the OpenConfirm state.
        fsm::State::OpenConfirm
    }

    // Performs semantic validation of the received BGP OPEN message.
    // Syntactic errors are detected during the decoding phase.
    fn open_validate(
        &self,
        instance: &InstanceUpView<'_>,
        msg: &OpenMsg,
    ) -> Result<(), Error> {
        // Validate ASN.
        if self.config.peer_as != msg.real_as() {
            return Err(Error::NbrBadAs(
                self.remote_addr,
                msg.real_as(),
                self.config.peer_as,
            ));
        }

        // Validate BGP identifier for internal peers.
        if self.peer_type == PeerType::Internal
            && msg.identifier == instance.state.router_id
        {
            return Err(Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            ));
        }

        Ok(())
    }

    // Connection collision resolution (RFC 4271 - Section 6.8): decides
    // whether a new incoming connection displaces the one currently in use.
    pub fn collision_keep_incoming(
        &self,
        local_id: Ipv4Addr,
    ) -> bool {
        match self.state {
            // An established session always wins.
            fsm::State::Established => false,
            // Compare BGP identifiers: the connection initiated by the
            // higher router-id survives. The incoming connection was
            // initiated by the remote end.
            fsm::State::OpenConfirm => match self.identifier {
                Some(remote_id) => remote_id > local_id,
                None => true,
            },
            // In any earlier state the incoming connection replaces the
            // outgoing attempt.
            _ => true,
        }
    }

    // Returns the neighbor's Tx-TTL value based on the peer type and
    // configuration.
    pub(crate) fn tx_ttl(&self) -> u8 {
        match self.peer_type {
            PeerType::Internal => TTL_MAX,
            PeerType::External => {
                if self.config.transport.ttl_security.is_some() {
                    TTL_MAX
                } else if self.config.transport.ebgp_multihop_enabled
                    && let Some(ttl) = self.config.transport.ebgp_multihop_ttl
                {
                    ttl
                } else {
                    1
                }
            }
        }
    }

    // Starts the auto-start timer with exponential backoff and jitter.
    fn autostart_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        use rand::Rng;

        let jitter = rand::rng().random_range(0.75..=1.25);
        let delay = (self.backoff as f64 * jitter).round() as u16;
        self.backoff = (self.backoff * 2).min(BACKOFF_MAX);

        let task = tasks::nbr_timer(
            self,
            fsm::Timer::AutoStart,
            delay.max(1),
            nbr_timerp,
        );
        self.tasks.autostart = Some(task);
    }

    // Stops the auto-start timer.
    fn autostart_stop(&mut self) {
        self.tasks.autostart = None;
    }

    // Starts a TCP connection task to the neighbor's remote address,
    // honoring the configured connection-attempt cap.
    fn connect(&mut self, tcp_connectp: &Sender<TcpConnectMsg>) {
        if self.config.connect_attempts != 0 {
            if self.connect_attempts >= self.config.connect_attempts {
                self.terminal = true;
                return;
            }
            self.connect_attempts += 1;
        }
        let task = tasks::tcp_connect(self, tcp_connectp);
        self.tasks.connect = Some(task);
    }

    // Starts the Keepalive Tx interval.
    fn keepalive_interval_start(&mut self, interval: u16) {
        let interval = self.config.timers.keepalive.unwrap_or(interval);
        if interval == 0 {
            return;
        }
        let task = tasks::nbr_kalive_interval(self, interval);
        self.tasks.keepalive = Some(task);
    }

    // Starts the session hold timer.
    fn holdtime_start(
        &mut self,
        seconds: u16,
        nbr_timerp: &Sender<NbrTimerMsg>,
    ) {
        let task =
            tasks::nbr_timer(self, fsm::Timer::Hold, seconds, nbr_timerp);
        self.tasks.holdtime = Some(task);
    }

    // Restarts the session hold timer if the negotiated HoldTime value is
    // non-zero.
    pub(crate) fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Stops the session hold timer.
    fn holdtime_stop(&mut self) {
        self.tasks.holdtime = None;
    }

    // Starts the open-wait watchdog.
    fn open_wait_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::OpenWait,
            self.config.timers.open_wait,
            nbr_timerp,
        );
        self.tasks.open_wait = Some(task);
    }

    // Stops the open-wait watchdog.
    fn open_wait_stop(&mut self) {
        self.tasks.open_wait = None;
    }

    // Starts the connect retry timer.
    fn connect_retry_start(&mut self, nbr_timerp: &Sender<NbrTimerMsg>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            self.config.timers.connect_retry_interval,
            nbr_timerp,
        );
        self.tasks.connect_retry = Some(task);
    }

    // Stops the connect retry timer.
    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Check if the given address-family was negotiated for this session.
    pub(crate) fn is_af_negotiated(&self, afi_safi: AfiSafi) -> bool {
        match &self.nego {
            Some(nego) => nego.families.contains(&afi_safi),
            None => false,
        }
    }
}

// ===== impl Negotiated =====

impl Negotiated {
    // Builds the negotiated session state from the locally advertised
    // capabilities and the received OPEN message.
    pub fn build(
        local: &BTreeSet<Capability>,
        remote_open: &OpenMsg,
        local_holdtime: u16,
    ) -> Negotiated {
        let remote = &remote_open.capabilities;
        let mut capabilities = BTreeSet::new();

        // Multiprotocol families: the intersection of both advertisements.
        // A peer that advertises no capabilities at all implies IPv4
        // unicast (RFC 4760 backward compatibility).
        let local_families: BTreeSet<_> = local
            .iter()
            .filter_map(|cap| match cap {
                Capability::MultiProtocol { afi_safi } => Some(*afi_safi),
                _ => None,
            })
            .collect();
        let remote_families: BTreeSet<_> = if remote.is_empty() {
            [AfiSafi::Ipv4Unicast].into()
        } else {
            remote
                .iter()
                .filter_map(|cap| match cap {
                    Capability::MultiProtocol { afi_safi } => Some(*afi_safi),
                    _ => None,
                })
                .collect()
        };
        let families: Vec<_> = local_families
            .intersection(&remote_families)
            .copied()
            .collect();
        for afi_safi in &families {
            capabilities.insert(NegotiatedCapability::MultiProtocol {
                afi_safi: *afi_safi,
            });
        }

        // Plain both-sides capabilities.
        let both = |f: fn(&Capability) -> bool| {
            local.iter().any(f) && remote.iter().any(f)
        };
        let four_byte_asn = both(|cap| cap.is_four_octet_as_number());
        if four_byte_asn {
            capabilities.insert(NegotiatedCapability::FourOctetAsNumber);
        }
        let route_refresh = both(|cap| cap.is_route_refresh());
        if route_refresh {
            capabilities.insert(NegotiatedCapability::RouteRefresh);
        }
        let enhanced_route_refresh =
            both(|cap| cap.is_enhanced_route_refresh());
        if enhanced_route_refresh {
            capabilities.insert(NegotiatedCapability::EnhancedRouteRefresh);
        }
        let extended_message = both(|cap| cap.is_extended_message());
        if extended_message {
            capabilities.insert(NegotiatedCapability::ExtendedMessage);
        }
        let operational = both(|cap| cap.is_operational());
        if operational {
            capabilities.insert(NegotiatedCapability::Operational);
        }

        // Graceful restart: the remote state is recorded as received.
        let mut graceful_restart = None;
        if local.iter().any(|cap| cap.is_graceful_restart()) {
            for cap in remote {
                if let Capability::GracefulRestart {
                    flags,
                    restart_time,
                    families,
                } = cap
                {
                    capabilities
                        .insert(NegotiatedCapability::GracefulRestart);
                    graceful_restart = Some(GrNegotiated {
                        flags: *flags,
                        restart_time: *restart_time,
                        families: families.clone(),
                    });
                }
            }
        }

        // Add-path directions are negotiated independently per family:
        // sending requires the local Send mode paired with the remote
        // Receive mode, and conversely for receiving.
        let addpath = |caps: &BTreeSet<Capability>, afi_safi, send| {
            caps.iter().any(|cap| {
                if let Capability::AddPath(tuples) = cap {
                    tuples.iter().any(|tuple| {
                        tuple.afi_safi == afi_safi
                            && match send {
                                true => matches!(
                                    tuple.mode,
                                    AddPathMode::Send
                                        | AddPathMode::ReceiveSend
                                ),
                                false => matches!(
                                    tuple.mode,
                                    AddPathMode::Receive
                                        | AddPathMode::ReceiveSend
                                ),
                            }
                    })
                } else {
                    false
                }
            })
        };
        for afi_safi in &families {
            if addpath(local, *afi_safi, true)
                && addpath(remote, *afi_safi, false)
            {
                capabilities
                    .insert(NegotiatedCapability::AddPathTx(*afi_safi));
            }
            if addpath(local, *afi_safi, false)
                && addpath(remote, *afi_safi, true)
            {
                capabilities
                    .insert(NegotiatedCapability::AddPathRx(*afi_safi));
            }
        }

        // Hold time is the minimum of the two proposals; a zero from either
        // side disables keepalives and the hold-down timer altogether.
        let holdtime = std::cmp::min(local_holdtime, remote_open.holdtime);
        let keepalive = holdtime / 3;

        Negotiated {
            capabilities,
            four_byte_asn,
            families,
            route_refresh,
            enhanced_route_refresh,
            extended_message,
            graceful_restart,
            operational,
            holdtime,
            keepalive,
            remote_as: remote_open.real_as(),
            remote_identifier: remote_open.identifier,
        }
    }

    pub fn max_msg_len(&self) -> u16 {
        if self.extended_message {
            Message::MAX_LEN_EXT
        } else {
            Message::MAX_LEN
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, msg: &Message) {
        self.total.fetch_add(1, atomic::Ordering::Relaxed);
        match msg {
            Message::Update(_) => {
                self.updates += 1;
            }
            Message::Notification(_) => {
                self.notifications += 1;
            }
            Message::RouteRefresh(_) => {
                self.route_refreshes += 1;
            }
            _ => {}
        }
    }
}
