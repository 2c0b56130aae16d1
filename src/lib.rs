// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Device access state management for the cgroup v2 device controller.
//!
//! In cgroups v2, device access control is enforced by eBPF programs
//! instead of control files, so a cgroup's device access state cannot be
//! read back from the kernel. The [`manager::DeviceManager`] tracks the
//! intended per-cgroup state, validates requested changes, reduces them
//! to an installable (allow, deny) rule pair with [`diff::apply_diff`],
//! and commits the result through the [`controller::DeviceController`]
//! port.

#[macro_use]
extern crate slog;

pub mod config;
pub mod controller;
pub mod diff;
pub mod entry;
pub mod manager;
pub mod validate;
