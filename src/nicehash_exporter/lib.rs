// nicehash_exporter - Prometheus metrics exporter for NiceHash mining rigs
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Prometheus metrics exporter for NiceHash mining rigs
//!
//! ## Features
//!
//! `nicehash_exporter` periodically fetches the state of your mining rigs, your BTC wallet balance,
//! and current exchange rates from the NiceHash API and emits them as Prometheus metrics. All
//! metric names share a configurable prefix (`nh_` by default). The following metrics are emitted.
//!
//! * `nh_total_rigs` - Number of rigs you own.
//! * `nh_total_devices` - Number of devices in the rigs.
//! * `nh_total_profitability` - Total profitability of all rigs.
//! * `nh_unpaid_amount` - Unpaid mining amount.
//! * `nh_total_btc` - Total BTC wallet balance.
//! * `nh_$PAIR_rate` - Exchange rate for each configured currency pair, e.g. `nh_btcusdc_rate`.
//! * `nh_miner_statuses{status=$STATUS}` - Number of rigs in each status.
//! * `nh_devices_statuses{status=$STATUS}` - Number of devices in each status.
//! * `nh_device_temp{rig_name, device_name, device_id, device_type}` - Device temperature.
//! * `nh_device_load{rig_name, device_name, device_id, device_type}` - Device load.
//! * `nh_device_power{rig_name, device_name, device_id, device_type}` - Device power usage.
//! * `nh_device_speed{rig_name, device_name, device_id, device_type, algo, suffix}` - Device speed
//!   for each algorithm it is mining.
//! * `nh_device_status_info{rig_name, device_name, device_id, device_type, status}` - Device status,
//!   always `1`.
//! * `nh_rig_status_time{rig_name, rig_id}` - Time of the last rig status change.
//! * `nh_rig_join_time{rig_name, rig_id}` - Time the rig joined.
//!
//! Rig and device metrics only include rigs and devices present in the most recent response
//! from the API. If a request to the API fails, metrics derived from it keep their previous
//! values until the next successful request.
//!
//! ## Build
//!
//! `nicehash_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Credentials
//!
//! Create a read-only API key for your organization in the NiceHash web interface. The API key,
//! secret, and organization ID must be provided, either as flags or environment variables. The
//! exporter refuses to start without them.
//!
//! ```text
//! NH_API_KEY=... NH_API_SECRET=... NH_API_ORG_ID=... ./nicehash_exporter
//! ```
//!
//! Other settings and their environment variables are listed by `./nicehash_exporter --help`.
//! Notable ones are `PORT` (default `3000`), `REFRESH_RATE_SECONDS` (default `30`),
//! `NH_METRICS_PREFIX` (default `nh_`), and `NH_RATES` (default `BTCUSDC,BTCEURS`).
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `3000` at `/metrics`. Once `nicehash_exporter`
//! is running, configure scrapes of it by your Prometheus server. Add the host running
//! `nicehash_exporter` as a target under the Prometheus `scrape_configs` section as described by
//! the example below.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     15s
//!   evaluation_interval: 15s
//!   external_labels:
//!     monitor: 'my_prom'
//!
//! scrape_configs:
//! - job_name: nicehash_exporter
//!   static_configs:
//!   - targets: ['example:3000']
//! ```
//!

pub mod client;
pub mod http;
pub mod metrics;
pub mod refresh;
pub mod report;

#[cfg(test)]
mod test_support;
