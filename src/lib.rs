// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

pub mod client;
pub mod controller;
pub mod mqtt;
pub mod util;

pub mod configuration;
pub mod errors;
pub mod fields;
pub mod startup;
pub mod telemetry;
pub mod topic;

pub use controller::*;
pub use startup::*;
