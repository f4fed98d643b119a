//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod api;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod neighbor;
pub mod network;
pub mod packet;
pub mod rib;
pub mod tasks;
