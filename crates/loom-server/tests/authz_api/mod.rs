// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod debug;
mod middleware;
mod policies;
mod requests;
mod stage_apply;
mod support;
