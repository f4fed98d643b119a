//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

//! Parser for the line-oriented helper/control command grammar.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use bgpio_utils::bgp::{
    AfiSafi, Comm, ExtComm, LabelStack, LargeComm, PathId, RouteDistinguisher,
};
use bgpio_utils::ip::{AddressFamily, IpNetworkExt};
use ipnetwork::IpNetwork;

use crate::neighbor::{Neighbor, Neighbors};
use crate::packet::attribute::{
    Aggregator, AsPath, Attrs, ClusterList, CommList,
};
use crate::packet::consts::{OperationalCode, Origin};
use crate::packet::message::OperationalMsg;
use crate::packet::nlri::flowspec::{
    BinaryOp, FlowRule, FlowspecNlri, NumericOp,
};
use crate::packet::nlri::{
    InetNlri, LabeledNlri, Nlri, VplsNlri, VpnNlri,
};

pub const HELP: &[&str] = &[
    "announce route <prefix> next-hop <ip> [attributes..]",
    "withdraw route <prefix> [attributes..]",
    "announce flow { match { .. } then { .. } }",
    "withdraw flow { match { .. } then { .. } }",
    "announce vpls rd <rd> endpoint <n> base <n> offset <n> size <n> next-hop <ip>",
    "withdraw vpls rd <rd> endpoint <n> base <n> offset <n> size <n>",
    "announce eor <afi> <safi>",
    "announce route-refresh <afi> <safi>",
    "announce operational (asm|adm|rpcq|rpcp|apcq|apcp|lpcq|lpcp) ..",
    "show neighbor [summary|extensive|configuration|json]",
    "show adj-rib (in|out) [extensive]",
    "flush adj-rib out [neighbor <ip>]",
    "teardown <selector> <code>",
    "reload | restart | shutdown | version | help",
];

// A parsed API command.
#[derive(Debug)]
pub enum ApiCommand {
    AnnounceRoutes {
        selector: NeighborSelector,
        routes: Vec<(Nlri, Attrs, Option<u8>)>,
    },
    WithdrawRoutes {
        selector: NeighborSelector,
        nlris: Vec<Nlri>,
    },
    AnnounceEor {
        selector: NeighborSelector,
        afi_safi: AfiSafi,
    },
    AnnounceRouteRefresh {
        selector: NeighborSelector,
        afi_safi: AfiSafi,
    },
    AnnounceOperational {
        selector: NeighborSelector,
        msg: OperationalMsg,
    },
    ShowNeighbor {
        mode: ShowNeighborMode,
    },
    ShowAdjRib {
        direction: RibDirection,
        extensive: bool,
    },
    FlushAdjRibOut {
        selector: NeighborSelector,
    },
    Teardown {
        selector: NeighborSelector,
        code: u8,
    },
    Reload,
    Restart,
    Shutdown,
    Version,
    Help,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShowNeighborMode {
    Summary,
    Extensive,
    Configuration,
    Json,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RibDirection {
    In,
    Out,
}

// Neighbor selector: a specific address with optional qualifiers, or a
// wildcard matching every configured neighbor.
#[derive(Clone, Debug, Default)]
pub struct NeighborSelector {
    pub addr: Option<IpAddr>,
    pub local_ip: Option<IpAddr>,
    pub local_as: Option<u32>,
    pub peer_as: Option<u32>,
    pub router_id: Option<Ipv4Addr>,
}

type ParseResult<T> = Result<T, String>;

// ===== impl NeighborSelector =====

impl NeighborSelector {
    // Returns the addresses of the neighbors matched by this selector.
    pub fn select(&self, neighbors: &Neighbors) -> Vec<IpAddr> {
        neighbors
            .values()
            .filter(|nbr| self.matches(nbr))
            .map(|nbr| nbr.remote_addr)
            .collect()
    }

    fn matches(&self, nbr: &Neighbor) -> bool {
        if let Some(addr) = self.addr
            && addr != nbr.remote_addr
        {
            return false;
        }
        if let Some(local_ip) = self.local_ip
            && nbr
                .conn_info
                .as_ref()
                .map(|conn_info| conn_info.local_addr)
                != Some(local_ip)
        {
            return false;
        }
        if let Some(local_as) = self.local_as
            && nbr.config.local_as.is_some_and(|asn| asn != local_as)
        {
            return false;
        }
        if let Some(peer_as) = self.peer_as
            && nbr.config.peer_as != peer_as
        {
            return false;
        }
        if let Some(router_id) = self.router_id
            && nbr.identifier != Some(router_id)
        {
            return false;
        }
        true
    }
}

// ===== parser =====

// Parses a command line. The returned error string becomes the single
// payload line of the `error` response.
pub fn parse(line: &str) -> ParseResult<ApiCommand> {
    let tokens = tokenize(line);
    let mut cursor = Cursor::new(&tokens);

    // Optional neighbor selector prefix.
    let selector = parse_selector(&mut cursor)?;

    match cursor.next() {
        Some("announce") => match cursor.next() {
            Some("route") => {
                let (nlri, attrs, split) = parse_route(&mut cursor, true)?;
                Ok(ApiCommand::AnnounceRoutes {
                    selector,
                    routes: vec![(nlri, attrs, split)],
                })
            }
            Some("flow") => {
                let (nlri, attrs) = parse_flow(&mut cursor)?;
                Ok(ApiCommand::AnnounceRoutes {
                    selector,
                    routes: vec![(nlri, attrs, None)],
                })
            }
            Some("vpls") => {
                let (nlri, attrs) = parse_vpls(&mut cursor, true)?;
                Ok(ApiCommand::AnnounceRoutes {
                    selector,
                    routes: vec![(nlri, attrs, None)],
                })
            }
            Some("eor") => {
                let afi_safi = parse_afi_safi(&mut cursor)?;
                Ok(ApiCommand::AnnounceEor { selector, afi_safi })
            }
            Some("route-refresh") => {
                let afi_safi = parse_afi_safi(&mut cursor)?;
                Ok(ApiCommand::AnnounceRouteRefresh { selector, afi_safi })
            }
            Some("operational") => {
                let msg = parse_operational(&mut cursor)?;
                Ok(ApiCommand::AnnounceOperational { selector, msg })
            }
            other => Err(format!(
                "unknown announce target: {}",
                other.unwrap_or("<none>")
            )),
        },
        Some("withdraw") => match cursor.next() {
            Some("route") => {
                let (nlri, _attrs, _split) = parse_route(&mut cursor, false)?;
                Ok(ApiCommand::WithdrawRoutes {
                    selector,
                    nlris: vec![nlri],
                })
            }
            Some("flow") => {
                let (nlri, _attrs) = parse_flow(&mut cursor)?;
                Ok(ApiCommand::WithdrawRoutes {
                    selector,
                    nlris: vec![nlri],
                })
            }
            Some("vpls") => {
                let (nlri, _attrs) = parse_vpls(&mut cursor, false)?;
                Ok(ApiCommand::WithdrawRoutes {
                    selector,
                    nlris: vec![nlri],
                })
            }
            other => Err(format!(
                "unknown withdraw target: {}",
                other.unwrap_or("<none>")
            )),
        },
        Some("show") => match cursor.next() {
            Some("neighbor") => {
                let mode = match cursor.next() {
                    None | Some("summary") => ShowNeighborMode::Summary,
                    Some("extensive") => ShowNeighborMode::Extensive,
                    Some("configuration") => ShowNeighborMode::Configuration,
                    Some("json") => ShowNeighborMode::Json,
                    Some(other) => {
                        return Err(format!(
                            "unknown show neighbor mode: {}",
                            other
                        ));
                    }
                };
                Ok(ApiCommand::ShowNeighbor { mode })
            }
            Some("adj-rib") => {
                let direction = match cursor.next() {
                    Some("in") => RibDirection::In,
                    Some("out") => RibDirection::Out,
                    _ => {
                        return Err(
                            "expected 'in' or 'out' after adj-rib".to_string()
                        );
                    }
                };
                let extensive = cursor.next() == Some("extensive");
                Ok(ApiCommand::ShowAdjRib {
                    direction,
                    extensive,
                })
            }
            other => Err(format!(
                "unknown show target: {}",
                other.unwrap_or("<none>")
            )),
        },
        Some("flush") => {
            if cursor.next() != Some("adj-rib")
                || cursor.next() != Some("out")
            {
                return Err("expected 'flush adj-rib out'".to_string());
            }
            // The selector may precede the command or follow it.
            let trailing = parse_selector(&mut cursor)?;
            let selector = merge_selectors(selector, trailing);
            Ok(ApiCommand::FlushAdjRibOut { selector })
        }
        Some("teardown") => {
            // The selector may precede the command or follow it.
            let trailing = parse_selector(&mut cursor)?;
            let selector = merge_selectors(selector, trailing);
            let code = match cursor.next() {
                Some(word) => word
                    .parse::<u8>()
                    .map_err(|_| "invalid teardown code".to_string())?,
                None => return Err("missing teardown code".to_string()),
            };
            Ok(ApiCommand::Teardown { selector, code })
        }
        Some("reload") => Ok(ApiCommand::Reload),
        Some("restart") => Ok(ApiCommand::Restart),
        Some("shutdown") => Ok(ApiCommand::Shutdown),
        Some("version") => Ok(ApiCommand::Version),
        Some("help") => Ok(ApiCommand::Help),
        other => Err(format!(
            "unknown command: {}",
            other.unwrap_or("<none>")
        )),
    }
}

// Splits a line into tokens, isolating the grouping characters even when
// they are glued to their neighbors and dropping statement separators.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in line.split_whitespace() {
        let mut word = word.trim_end_matches(';');

        // Leading group openers.
        while let Some(rest) = word
            .strip_prefix('[')
            .map(|rest| ("[", rest))
            .or_else(|| word.strip_prefix('{').map(|rest| ("{", rest)))
        {
            tokens.push(rest.0.to_string());
            word = rest.1;
        }

        // Trailing group closers.
        let mut closers = Vec::new();
        while let Some(rest) = word
            .strip_suffix(']')
            .map(|rest| (rest, "]"))
            .or_else(|| word.strip_suffix('}').map(|rest| (rest, "}")))
        {
            closers.push(rest.1.to_string());
            word = rest.0;
        }

        if !word.is_empty() {
            tokens.push(word.to_string());
        }
        tokens.extend(closers.into_iter().rev());
    }
    tokens
}

struct Cursor<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [String]) -> Cursor<'a> {
        Cursor { tokens, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token.as_str())
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(|token| token.as_str())
    }

    fn expect(&mut self, token: &str) -> ParseResult<()> {
        match self.next() {
            Some(word) if word == token => Ok(()),
            other => Err(format!(
                "expected '{}', found '{}'",
                token,
                other.unwrap_or("<end>")
            )),
        }
    }

    // Collects the bracketed list following the current position, or the
    // single next token when no bracket is present.
    fn list(&mut self) -> ParseResult<Vec<&'a str>> {
        match self.peek() {
            Some("[") => {
                self.next();
                let mut items = Vec::new();
                loop {
                    match self.next() {
                        Some("]") => break,
                        Some(item) => items.push(item),
                        None => {
                            return Err("unterminated list".to_string());
                        }
                    }
                }
                Ok(items)
            }
            Some(_) => Ok(vec![self.next().unwrap()]),
            None => Err("missing value".to_string()),
        }
    }
}

fn merge_selectors(
    leading: NeighborSelector,
    trailing: NeighborSelector,
) -> NeighborSelector {
    if leading.addr.is_some() {
        leading
    } else {
        trailing
    }
}

// Parses the optional `neighbor <ip> [qualifier value]*` prefix.
fn parse_selector(cursor: &mut Cursor<'_>) -> ParseResult<NeighborSelector> {
    let mut selector = NeighborSelector::default();
    while cursor.peek() == Some("neighbor") {
        cursor.next();
        let addr = cursor
            .next()
            .ok_or("missing neighbor address")?
            .parse::<IpAddr>()
            .map_err(|_| "invalid neighbor address".to_string())?;
        selector.addr = Some(addr);

        loop {
            match cursor.peek() {
                Some("local-ip") => {
                    cursor.next();
                    let value = cursor.next().ok_or("missing local-ip")?;
                    selector.local_ip = Some(
                        value
                            .parse()
                            .map_err(|_| "invalid local-ip".to_string())?,
                    );
                }
                Some("local-as") => {
                    cursor.next();
                    let value = cursor.next().ok_or("missing local-as")?;
                    selector.local_as = Some(
                        value
                            .parse()
                            .map_err(|_| "invalid local-as".to_string())?,
                    );
                }
                Some("peer-as") => {
                    cursor.next();
                    let value = cursor.next().ok_or("missing peer-as")?;
                    selector.peer_as = Some(
                        value
                            .parse()
                            .map_err(|_| "invalid peer-as".to_string())?,
                    );
                }
                Some("router-id") => {
                    cursor.next();
                    let value = cursor.next().ok_or("missing router-id")?;
                    selector.router_id = Some(
                        value
                            .parse()
                            .map_err(|_| "invalid router-id".to_string())?,
                    );
                }
                Some("family-allowed") => {
                    cursor.next();
                    cursor.next();
                }
                _ => break,
            }
        }
    }
    Ok(selector)
}

// Parses `<afi> <safi>`.
fn parse_afi_safi(cursor: &mut Cursor<'_>) -> ParseResult<AfiSafi> {
    let afi = cursor.next().ok_or("missing afi")?;
    let safi = cursor.next().ok_or("missing safi")?;
    format!("{} {}", afi, safi)
        .parse::<AfiSafi>()
        .map_err(|_| format!("unknown address family: {} {}", afi, safi))
}

// Parses `route <prefix> [clauses..]` into an NLRI and its attribute set.
fn parse_route(
    cursor: &mut Cursor<'_>,
    announce: bool,
) -> ParseResult<(Nlri, Attrs, Option<u8>)> {
    let prefix = cursor
        .next()
        .ok_or("missing prefix")?
        .parse::<IpNetwork>()
        .map_err(|_| "invalid prefix".to_string())?
        .apply_mask();

    let mut attrs = Attrs::default();
    let mut labels: Option<LabelStack> = None;
    let mut rd: Option<RouteDistinguisher> = None;
    let mut path_id: Option<PathId> = None;
    let mut split: Option<u8> = None;

    while let Some(keyword) = cursor.next() {
        match keyword {
            "next-hop" => {
                let value = cursor.next().ok_or("missing next-hop")?;
                if value == "self" {
                    // Resolved at transmission time from the session source.
                    continue;
                }
                attrs.base.nexthop = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid next-hop".to_string())?,
                );
            }
            "origin" => {
                let value = cursor.next().ok_or("missing origin")?;
                attrs.base.origin = match value {
                    "igp" => Origin::Igp,
                    "egp" => Origin::Egp,
                    "incomplete" => Origin::Incomplete,
                    _ => return Err("invalid origin".to_string()),
                };
            }
            "as-path" => {
                let members = cursor
                    .list()?
                    .into_iter()
                    .map(|asn| asn.parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| "invalid as-path".to_string())?;
                attrs.base.as_path = AsPath::from_sequence(members);
            }
            "med" => {
                let value = cursor.next().ok_or("missing med")?;
                attrs.base.med = Some(
                    value.parse().map_err(|_| "invalid med".to_string())?,
                );
            }
            "local-preference" => {
                let value =
                    cursor.next().ok_or("missing local-preference")?;
                attrs.base.local_pref = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid local-preference".to_string())?,
                );
            }
            "community" => {
                let comms = cursor
                    .list()?
                    .into_iter()
                    .map(|comm| comm.parse::<Comm>())
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map_err(|_| "invalid community".to_string())?;
                attrs.comm = Some(CommList(comms));
            }
            "extended-community" => {
                let comms = cursor
                    .list()?
                    .into_iter()
                    .map(|comm| comm.parse::<ExtComm>())
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map_err(|_| "invalid extended-community".to_string())?;
                attrs.ext_comm = Some(CommList(comms));
            }
            "large-community" => {
                let comms = cursor
                    .list()?
                    .into_iter()
                    .map(|comm| comm.parse::<LargeComm>())
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map_err(|_| "invalid large-community".to_string())?;
                attrs.large_comm = Some(CommList(comms));
            }
            "originator-id" => {
                let value = cursor.next().ok_or("missing originator-id")?;
                attrs.base.originator_id = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid originator-id".to_string())?,
                );
            }
            "cluster-list" => {
                let ids = cursor
                    .list()?
                    .into_iter()
                    .map(|id| id.parse::<Ipv4Addr>())
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map_err(|_| "invalid cluster-list".to_string())?;
                attrs.base.cluster_list = Some(ClusterList(ids));
            }
            "atomic-aggregate" => {
                attrs.base.atomic_aggregate = true;
            }
            "aggregator" => {
                // "(asn:ip)" form.
                let value = cursor.next().ok_or("missing aggregator")?;
                let value =
                    value.trim_start_matches('(').trim_end_matches(')');
                let (asn, identifier) = value
                    .split_once(':')
                    .ok_or("invalid aggregator".to_string())?;
                attrs.base.aggregator = Some(Aggregator {
                    asn: asn
                        .parse()
                        .map_err(|_| "invalid aggregator".to_string())?,
                    identifier: identifier
                        .parse()
                        .map_err(|_| "invalid aggregator".to_string())?,
                });
            }
            "aigp" => {
                let value = cursor.next().ok_or("missing aigp")?;
                attrs.aigp = Some(
                    value.parse().map_err(|_| "invalid aigp".to_string())?,
                );
            }
            "label" => {
                let values = cursor
                    .list()?
                    .into_iter()
                    .map(|label| label.parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| "invalid label".to_string())?;
                labels = Some(LabelStack::from_values(&values));
            }
            "rd" | "route-distinguisher" => {
                let value = cursor.next().ok_or("missing rd")?;
                rd = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid route distinguisher".to_string())?,
                );
            }
            "path-information" => {
                let value =
                    cursor.next().ok_or("missing path-information")?;
                let id = match value.parse::<u32>() {
                    Ok(id) => id,
                    Err(_) => value
                        .parse::<Ipv4Addr>()
                        .map(u32::from)
                        .map_err(|_| "invalid path-information".to_string())?,
                };
                path_id = Some(PathId(id));
            }
            "split" => {
                let value = cursor.next().ok_or("missing split")?;
                let value = value.strip_prefix('/').unwrap_or(value);
                split = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid split length".to_string())?,
                );
            }
            "watchdog" | "name" => {
                // Accepted for compatibility; no effect on the wire.
                cursor.next();
            }
            other => {
                return Err(format!("unknown route clause: {}", other));
            }
        }
    }

    if announce && attrs.base.nexthop.is_none() {
        return Err("missing next-hop".to_string());
    }

    // The clause combination picks the NLRI shape.
    let nlri = match (rd, labels) {
        (Some(rd), Some(labels)) => Nlri::Vpn(VpnNlri {
            rd,
            prefix,
            labels,
            path_id,
        }),
        (Some(rd), None) => Nlri::Vpn(VpnNlri {
            rd,
            prefix,
            labels: if announce {
                LabelStack::from_values(&[0])
            } else {
                LabelStack::withdraw()
            },
            path_id,
        }),
        (None, Some(labels)) => Nlri::LabeledUnicast(LabeledNlri {
            prefix,
            labels,
            path_id,
        }),
        (None, None) => Nlri::Unicast(InetNlri { prefix, path_id }),
    };

    Ok((nlri, attrs, split))
}

// Parses `vpls rd <rd> endpoint <n> base <n> offset <n> size <n>
// [next-hop <ip>]`.
fn parse_vpls(
    cursor: &mut Cursor<'_>,
    announce: bool,
) -> ParseResult<(Nlri, Attrs)> {
    let mut rd = None;
    let mut ve_id = None;
    let mut label_base = None;
    let mut ve_block_offset = None;
    let mut ve_block_size = None;
    let mut attrs = Attrs::default();

    while let Some(keyword) = cursor.next() {
        match keyword {
            "rd" => {
                let value = cursor.next().ok_or("missing rd")?;
                rd = Some(
                    value
                        .parse::<RouteDistinguisher>()
                        .map_err(|_| "invalid route distinguisher".to_string())?,
                );
            }
            "endpoint" => {
                let value = cursor.next().ok_or("missing endpoint")?;
                ve_id = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid endpoint".to_string())?,
                );
            }
            "base" => {
                let value = cursor.next().ok_or("missing base")?;
                label_base = Some(
                    value.parse().map_err(|_| "invalid base".to_string())?,
                );
            }
            "offset" => {
                let value = cursor.next().ok_or("missing offset")?;
                ve_block_offset = Some(
                    value.parse().map_err(|_| "invalid offset".to_string())?,
                );
            }
            "size" => {
                let value = cursor.next().ok_or("missing size")?;
                ve_block_size = Some(
                    value.parse().map_err(|_| "invalid size".to_string())?,
                );
            }
            "next-hop" => {
                let value = cursor.next().ok_or("missing next-hop")?;
                attrs.base.nexthop = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid next-hop".to_string())?,
                );
            }
            other => {
                return Err(format!("unknown vpls clause: {}", other));
            }
        }
    }

    let nlri = Nlri::Vpls(VplsNlri {
        rd: rd.ok_or("missing rd")?,
        ve_id: ve_id.ok_or("missing endpoint")?,
        ve_block_offset: ve_block_offset.ok_or("missing offset")?,
        ve_block_size: ve_block_size.ok_or("missing size")?,
        label_base: label_base.ok_or("missing base")?,
    });

    if announce && attrs.base.nexthop.is_none() {
        return Err("missing next-hop".to_string());
    }

    Ok((nlri, attrs))
}

// Parses `flow [rd <rd>] [next-hop <ip>] { match { .. } then { .. } }`.
fn parse_flow(cursor: &mut Cursor<'_>) -> ParseResult<(Nlri, Attrs)> {
    let mut rd = None;
    let mut attrs = Attrs::default();

    // Leading clauses before the block.
    loop {
        match cursor.peek() {
            Some("rd") => {
                cursor.next();
                let value = cursor.next().ok_or("missing rd")?;
                rd = Some(
                    value
                        .parse::<RouteDistinguisher>()
                        .map_err(|_| "invalid route distinguisher".to_string())?,
                );
            }
            Some("next-hop") => {
                cursor.next();
                let value = cursor.next().ok_or("missing next-hop")?;
                attrs.base.nexthop = Some(
                    value
                        .parse()
                        .map_err(|_| "invalid next-hop".to_string())?,
                );
            }
            Some("route") => {
                cursor.next();
            }
            _ => break,
        }
    }

    cursor.expect("{")?;

    let mut rules: Vec<FlowRule> = Vec::new();
    let mut af = AddressFamily::Ipv4;

    loop {
        match cursor.next() {
            Some("match") => {
                cursor.expect("{")?;
                while cursor.peek() != Some("}") {
                    let rule = parse_flow_match(cursor, &mut af)?;
                    rules.push(rule);
                }
                cursor.expect("}")?;
            }
            Some("then") => {
                cursor.expect("{")?;
                while cursor.peek() != Some("}") {
                    parse_flow_action(cursor, &mut attrs)?;
                }
                cursor.expect("}")?;
            }
            Some("}") => break,
            other => {
                return Err(format!(
                    "unexpected token in flow block: {}",
                    other.unwrap_or("<end>")
                ));
            }
        }
    }

    let nlri = Nlri::Flowspec(FlowspecNlri::new(af, rd, rules));
    Ok((nlri, attrs))
}

// Parses one match clause.
fn parse_flow_match(
    cursor: &mut Cursor<'_>,
    af: &mut AddressFamily,
) -> ParseResult<FlowRule> {
    let keyword = cursor.next().ok_or("missing match clause")?;
    match keyword {
        "source" | "destination" => {
            let value = cursor.next().ok_or("missing prefix")?;
            let prefix = value
                .parse::<IpNetwork>()
                .map_err(|_| "invalid prefix".to_string())?
                .apply_mask();
            if matches!(prefix, IpNetwork::V6(_)) {
                *af = AddressFamily::Ipv6;
            }
            let rule = match keyword {
                "source" => FlowRule::SourcePrefix { prefix, offset: 0 },
                _ => FlowRule::DestinationPrefix { prefix, offset: 0 },
            };
            Ok(rule)
        }
        "protocol" => {
            let ops = parse_numeric_list(cursor, parse_protocol_value)?;
            Ok(FlowRule::Protocol(ops))
        }
        "port" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::Port(ops))
        }
        "destination-port" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::DestinationPort(ops))
        }
        "source-port" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::SourcePort(ops))
        }
        "icmp-type" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::IcmpType(ops))
        }
        "icmp-code" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::IcmpCode(ops))
        }
        "packet-length" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::PacketLength(ops))
        }
        "dscp" => {
            let ops = parse_numeric_list(cursor, parse_plain_value)?;
            Ok(FlowRule::Dscp(ops))
        }
        "tcp-flags" => {
            let values = cursor.list()?;
            let mut ops = Vec::new();
            for value in values {
                let value = match value {
                    "fin" => 0x01,
                    "syn" => 0x02,
                    "rst" => 0x04,
                    "push" => 0x08,
                    "ack" => 0x10,
                    "urgent" => 0x20,
                    _ => value
                        .parse::<u16>()
                        .map_err(|_| "invalid tcp-flags".to_string())?,
                };
                ops.push(BinaryOp::match_value(value));
            }
            Ok(FlowRule::TcpFlags(ops))
        }
        "fragment" => {
            let values = cursor.list()?;
            let mut ops = Vec::new();
            for value in values {
                let value = match value {
                    "dont-fragment" => 0x01,
                    "is-fragment" => 0x02,
                    "first-fragment" => 0x04,
                    "last-fragment" => 0x08,
                    "not-a-fragment" => 0x00,
                    _ => value
                        .parse::<u16>()
                        .map_err(|_| "invalid fragment".to_string())?,
                };
                ops.push(BinaryOp::match_value(value));
            }
            Ok(FlowRule::Fragment(ops))
        }
        other => Err(format!("unknown match clause: {}", other)),
    }
}

// Parses one then-clause into the corresponding attribute action.
fn parse_flow_action(
    cursor: &mut Cursor<'_>,
    attrs: &mut Attrs,
) -> ParseResult<()> {
    let keyword = cursor.next().ok_or("missing action")?;
    let mut add_ext_comm = |comm: ExtComm| {
        let comms = attrs.ext_comm.get_or_insert_with(|| CommList(BTreeSet::new()));
        comms.0.insert(comm);
    };
    match keyword {
        "discard" => {
            add_ext_comm(ExtComm::traffic_rate(0, 0.0));
            Ok(())
        }
        "rate-limit" => {
            let value = cursor.next().ok_or("missing rate")?;
            let rate = value
                .parse::<f32>()
                .map_err(|_| "invalid rate".to_string())?;
            add_ext_comm(ExtComm::traffic_rate(0, rate));
            Ok(())
        }
        "redirect" => {
            let value = cursor.next().ok_or("missing redirect target")?;
            let (asn, local) = value
                .split_once(':')
                .ok_or("invalid redirect target".to_string())?;
            let asn = asn
                .parse::<u16>()
                .map_err(|_| "invalid redirect target".to_string())?;
            let local = local
                .parse::<u32>()
                .map_err(|_| "invalid redirect target".to_string())?;
            add_ext_comm(ExtComm::redirect(asn, local));
            Ok(())
        }
        "mark" => {
            let value = cursor.next().ok_or("missing dscp value")?;
            let dscp = value
                .parse::<u8>()
                .map_err(|_| "invalid dscp value".to_string())?;
            add_ext_comm(ExtComm::traffic_marking(dscp));
            Ok(())
        }
        "community" => {
            let comms = cursor
                .list()?
                .into_iter()
                .map(|comm| comm.parse::<Comm>())
                .collect::<Result<BTreeSet<_>, _>>()
                .map_err(|_| "invalid community".to_string())?;
            attrs.comm = Some(CommList(comms));
            Ok(())
        }
        other => Err(format!("unknown flow action: {}", other)),
    }
}

// Parses a possibly-bracketed list of numeric operator expressions.
fn parse_numeric_list(
    cursor: &mut Cursor<'_>,
    value_parser: fn(&str) -> ParseResult<u64>,
) -> ParseResult<Vec<NumericOp>> {
    let items = cursor.list()?;
    let mut ops = Vec::new();
    for item in items {
        // `&`-joined expressions form a conjunction.
        for (pos, expr) in item.split('&').enumerate() {
            let mut op = parse_numeric_op(expr, value_parser)?;
            op.and = pos > 0;
            ops.push(op);
        }
    }
    if ops.is_empty() {
        return Err("missing value".to_string());
    }
    Ok(ops)
}

// Parses one numeric operator expression ("=80", ">1024", "<=8080", ..).
fn parse_numeric_op(
    expr: &str,
    value_parser: fn(&str) -> ParseResult<u64>,
) -> ParseResult<NumericOp> {
    let (lt, gt, eq, rest) = if let Some(rest) = expr.strip_prefix(">=") {
        (false, true, true, rest)
    } else if let Some(rest) = expr.strip_prefix("<=") {
        (true, false, true, rest)
    } else if let Some(rest) = expr.strip_prefix("!=") {
        (true, true, false, rest)
    } else if let Some(rest) = expr.strip_prefix('>') {
        (false, true, false, rest)
    } else if let Some(rest) = expr.strip_prefix('<') {
        (true, false, false, rest)
    } else if let Some(rest) = expr.strip_prefix('=') {
        (false, false, true, rest)
    } else {
        (false, false, true, expr)
    };

    let value = value_parser(rest)?;
    Ok(NumericOp {
        and: false,
        lt,
        gt,
        eq,
        value,
    })
}

fn parse_plain_value(value: &str) -> ParseResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| format!("invalid value: {}", value))
}

fn parse_protocol_value(value: &str) -> ParseResult<u64> {
    match value {
        "icmp" => Ok(1),
        "igmp" => Ok(2),
        "tcp" => Ok(6),
        "udp" => Ok(17),
        "ipv6-icmp" => Ok(58),
        _ => parse_plain_value(value),
    }
}

// Parses `operational <code> [afi <afi> safi <safi>] advisory <text..>`.
fn parse_operational(
    cursor: &mut Cursor<'_>,
) -> ParseResult<OperationalMsg> {
    let code = match cursor.next() {
        Some("adm") => OperationalCode::Adm,
        Some("asm") => OperationalCode::Asm,
        Some("rpcq") => OperationalCode::Rpcq,
        Some("rpcp") => OperationalCode::Rpcp,
        Some("apcq") => OperationalCode::Apcq,
        Some("apcp") => OperationalCode::Apcp,
        Some("lpcq") => OperationalCode::Lpcq,
        Some("lpcp") => OperationalCode::Lpcp,
        other => {
            return Err(format!(
                "unknown operational code: {}",
                other.unwrap_or("<none>")
            ));
        }
    };

    // Only the advisory forms have a defined encoding.
    if !matches!(code, OperationalCode::Adm | OperationalCode::Asm) {
        return Err("unsupported operational code".to_string());
    }

    let mut afi_safi = AfiSafi::Ipv4Unicast;
    if cursor.peek() == Some("afi") {
        cursor.next();
        let afi = cursor.next().ok_or("missing afi")?;
        cursor.expect("safi")?;
        let safi = cursor.next().ok_or("missing safi")?;
        afi_safi = format!("{} {}", afi, safi)
            .parse::<AfiSafi>()
            .map_err(|_| "unknown address family".to_string())?;
    }

    if cursor.peek() == Some("advisory") {
        cursor.next();
    }
    let mut words = Vec::new();
    while let Some(word) = cursor.next() {
        words.push(word.trim_matches('"'));
    }
    let data = words.join(" ").into_bytes();

    Ok(OperationalMsg {
        code,
        afi: afi_safi.afi(),
        safi: afi_safi.safi(),
        data,
    })
}
