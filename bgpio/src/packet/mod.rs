//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod attribute;
pub mod consts;
pub mod error;
pub mod message;
pub mod nlri;
