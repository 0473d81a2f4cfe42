// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use protocol::{Notification, Request, Response, RpcError};
pub use server::serve_stdio;
