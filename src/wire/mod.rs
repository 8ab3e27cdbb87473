// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// The wire protocol: a forward-compatible binary codec, the request/reply
// message catalog built on it, and the framed, fd-passing channel both
// the client and server speak over a UNIX-domain stream socket.

pub mod codec;
pub mod fd_channel;
pub mod messages;
