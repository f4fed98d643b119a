//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use bgpio_utils::bgp::AfiSafi;
use serde::{Deserialize, Serialize};

// Instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceCfg {
    pub asn: u32,
    pub identifier: Option<Ipv4Addr>,
    pub api: ApiCfg,
}

// Control channel configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct ApiCfg {
    // Path of the Unix control socket; none disables the control server.
    pub socket_path: Option<PathBuf>,
    // Exit the daemon when a helper write fails.
    pub terminate_on_error: bool,
}

// Neighbor configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborCfg {
    pub enabled: bool,
    pub peer_as: u32,
    pub local_as: Option<u32>,
    pub timers: TimersCfg,
    pub transport: TransportCfg,
    pub afi_safi: BTreeMap<AfiSafi, AfiSafiCfg>,
    pub graceful_restart: GracefulRestartCfg,
    // Cap on the number of outbound connection attempts; zero means
    // unlimited.
    pub connect_attempts: u32,
    // Do not restart the session after it drops.
    pub once: bool,
    // Advertise the operational-message capability.
    pub operational: bool,
}

// Neighbor timers.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct TimersCfg {
    pub holdtime: u16,
    pub keepalive: Option<u16>,
    pub connect_retry_interval: u16,
    // How long to wait for the peer's OPEN after sending ours.
    pub open_wait: u16,
}

// Neighbor transport options.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct TransportCfg {
    pub local_addr: Option<IpAddr>,
    pub passive_mode: bool,
    pub ttl_security: Option<u8>,
    pub ebgp_multihop_enabled: bool,
    pub ebgp_multihop_ttl: Option<u8>,
    pub md5_key: Option<String>,
    pub tcp_mss: Option<u16>,
}

// Per-address-family session configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AfiSafiCfg {
    pub enabled: bool,
    pub addpath_tx: bool,
    pub addpath_rx: bool,
    // Default `split /N` hint applied to announcements of this family.
    pub split: Option<u8>,
}

// Graceful restart configuration (RFC 4724).
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct GracefulRestartCfg {
    pub enabled: bool,
    pub restart_time: u16,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            asn: 0,
            identifier: None,
            api: ApiCfg::default(),
        }
    }
}

// ===== impl ApiCfg =====

impl Default for ApiCfg {
    fn default() -> ApiCfg {
        ApiCfg {
            socket_path: None,
            terminate_on_error: false,
        }
    }
}

// ===== impl NeighborCfg =====

impl Default for NeighborCfg {
    fn default() -> NeighborCfg {
        let mut afi_safi = BTreeMap::new();
        afi_safi.insert(AfiSafi::Ipv4Unicast, AfiSafiCfg::default());

        NeighborCfg {
            enabled: true,
            peer_as: 0,
            local_as: None,
            timers: TimersCfg::default(),
            transport: TransportCfg::default(),
            afi_safi,
            graceful_restart: GracefulRestartCfg::default(),
            connect_attempts: 0,
            once: false,
            operational: false,
        }
    }
}

impl NeighborCfg {
    // Returns the address families enabled for this neighbor.
    pub fn enabled_families(&self) -> impl Iterator<Item = AfiSafi> + '_ {
        self.afi_safi
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(afi_safi, _)| *afi_safi)
    }
}

// ===== impl TimersCfg =====

impl Default for TimersCfg {
    fn default() -> TimersCfg {
        TimersCfg {
            holdtime: 180,
            keepalive: None,
            connect_retry_interval: 120,
            open_wait: 10,
        }
    }
}

// ===== impl AfiSafiCfg =====

impl Default for AfiSafiCfg {
    fn default() -> AfiSafiCfg {
        AfiSafiCfg {
            enabled: true,
            addpath_tx: false,
            addpath_rx: false,
            split: None,
        }
    }
}

// ===== impl GracefulRestartCfg =====

impl Default for GracefulRestartCfg {
    fn default() -> GracefulRestartCfg {
        GracefulRestartCfg {
            enabled: false,
            restart_time: 120,
        }
    }
}
