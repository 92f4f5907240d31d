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

//! Fixtures and scrape helpers shared by unit tests.

use crate::client::MiningRigs;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde_json::json;

/// Build a rigs response with the given rig IDs, each with the given device IDs.
pub fn fleet_fixture(rigs: &[(&str, &[&str])]) -> MiningRigs {
    let mining_rigs: Vec<_> = rigs
        .iter()
        .map(|(rig_id, devices)| {
            json!({
                "rigId": rig_id,
                "name": format!("rig {}", rig_id),
                "statusTime": 1700000000000_u64,
                "joinTime": 1600000000,
                "devices": devices.iter().map(|id| json!({
                    "id": id,
                    "name": format!("device {}", id),
                    "temperature": 60,
                    "load": 99.5,
                    "powerUsage": 150,
                    "deviceType": {"enumName": "NVIDIA"},
                    "status": {"enumName": "MINING"},
                    "speeds": [{"algorithm": "DAGGERHASHIMOTO", "speed": "30.1", "displaySuffix": "MH"}],
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    let device_count: usize = rigs.iter().map(|(_, d)| d.len()).sum();
    serde_json::from_value(json!({
        "totalRigs": rigs.len(),
        "totalDevices": device_count,
        "totalProfitability": 0.0001,
        "unpaidAmount": "0.00002",
        "minerStatuses": {"MINING": rigs.len()},
        "devicesStatuses": {"MINING": device_count},
        "miningRigs": mining_rigs,
    }))
    .unwrap()
}

pub fn scrape(reg: &Registry) -> String {
    let mut buf = String::new();
    encode(&mut buf, reg).unwrap();
    buf
}

/// Value of the series with exactly the given name and labels, if present.
pub fn sample(text: &str, series: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        line.strip_prefix(series)
            .and_then(|rest| rest.strip_prefix(' '))
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Number of series lines starting with the given prefix.
pub fn series_count(text: &str, prefix: &str) -> usize {
    text.lines().filter(|line| line.starts_with(prefix)).count()
}
