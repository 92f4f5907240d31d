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

use crate::client::{Device, ExchangeRates, MiningRigs, Rig, Wallet};
use crate::report::{BatchReport, CycleReport, Entity, RecordFailure};
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

type FloatGauge = Gauge<f64, AtomicU64>;

/// Label value taken from an API response, escaped when encoded.
///
/// Rig and device names are free text edited by users. prometheus-client writes
/// label values as-is, so quotes, backslashes, and newlines are escaped here as
/// required by the text exposition format.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct LabelText(String);

impl From<&str> for LabelText {
    fn from(s: &str) -> Self {
        LabelText(s.to_owned())
    }
}

impl From<String> for LabelText {
    fn from(s: String) -> Self {
        LabelText(s)
    }
}

impl EncodeLabelValue for LabelText {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        for c in self.0.chars() {
            match c {
                '\\' => encoder.write_str("\\\\")?,
                '"' => encoder.write_str("\\\"")?,
                '\n' => encoder.write_str("\\n")?,
                c => encoder.write_char(c)?,
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    pub status: LabelText,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RigLabels {
    pub rig_name: LabelText,
    pub rig_id: LabelText,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeviceLabels {
    pub rig_name: LabelText,
    pub device_name: LabelText,
    pub device_id: LabelText,
    pub device_type: LabelText,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeviceStatusLabels {
    pub rig_name: LabelText,
    pub device_name: LabelText,
    pub device_id: LabelText,
    pub device_type: LabelText,
    pub status: LabelText,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SpeedLabels {
    pub rig_name: LabelText,
    pub device_name: LabelText,
    pub device_id: LabelText,
    pub device_type: LabelText,
    pub algo: LabelText,
    pub suffix: LabelText,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BatchLabels {
    pub batch: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EntityLabels {
    pub entity: String,
}

/// Holder for metrics that can be set from the rigs, wallet, and exchange rate responses.
///
/// All metrics are created and registered upon call to `FleetMetrics::new()` and all
/// share the supplied prefix (e.g. "nh_"). Metrics with labels that describe the current
/// set of rigs and devices are cleared each time a rigs response is applied so that rigs
/// and devices removed upstream stop being exported. Metrics without labels are only
/// ever overwritten.
#[derive(Debug)]
pub struct FleetMetrics {
    total_rigs: FloatGauge,
    total_devices: FloatGauge,
    total_profitability: FloatGauge,
    unpaid_amount: FloatGauge,
    total_btc: FloatGauge,
    rates: Vec<(String, FloatGauge)>,
    miner_statuses: Family<StatusLabels, FloatGauge>,
    devices_statuses: Family<StatusLabels, FloatGauge>,
    device_temp: Family<DeviceLabels, FloatGauge>,
    device_load: Family<DeviceLabels, FloatGauge>,
    device_power: Family<DeviceLabels, FloatGauge>,
    device_speed: Family<SpeedLabels, FloatGauge>,
    device_status_info: Family<DeviceStatusLabels, FloatGauge>,
    rig_status_time: Family<RigLabels, FloatGauge>,
    rig_join_time: Family<RigLabels, FloatGauge>,
}

impl FleetMetrics {
    /// Create a new `FleetMetrics` and register each metric with the provided `Registry`.
    ///
    /// One `<prefix><pair>_rate` gauge is registered for each distinct currency pair
    /// in `rates`, with the pair lowercased.
    pub fn new(reg: &mut Registry, prefix: &str, rates: &[String]) -> Self {
        let total_rigs = FloatGauge::default();
        let total_devices = FloatGauge::default();
        let total_profitability = FloatGauge::default();
        let unpaid_amount = FloatGauge::default();
        let total_btc = FloatGauge::default();
        let miner_statuses = Family::<StatusLabels, FloatGauge>::default();
        let devices_statuses = Family::<StatusLabels, FloatGauge>::default();
        let device_temp = Family::<DeviceLabels, FloatGauge>::default();
        let device_load = Family::<DeviceLabels, FloatGauge>::default();
        let device_power = Family::<DeviceLabels, FloatGauge>::default();
        let device_speed = Family::<SpeedLabels, FloatGauge>::default();
        let device_status_info = Family::<DeviceStatusLabels, FloatGauge>::default();
        let rig_status_time = Family::<RigLabels, FloatGauge>::default();
        let rig_join_time = Family::<RigLabels, FloatGauge>::default();

        let name = |n: &str| format!("{}{}", prefix, n);
        reg.register(name("total_rigs"), "Number of rigs you own", total_rigs.clone());
        reg.register(name("total_devices"), "Number of devices in the rigs", total_devices.clone());
        reg.register(
            name("total_profitability"),
            "Total profitability of all rigs",
            total_profitability.clone(),
        );
        reg.register(name("unpaid_amount"), "Unpaid mining amount", unpaid_amount.clone());
        reg.register(name("total_btc"), "Total BTC wallet balance", total_btc.clone());
        reg.register(name("miner_statuses"), "Number of rigs by status", miner_statuses.clone());
        reg.register(
            name("devices_statuses"),
            "Number of devices by status",
            devices_statuses.clone(),
        );
        reg.register(name("device_temp"), "Device temperature", device_temp.clone());
        reg.register(name("device_load"), "Device load", device_load.clone());
        reg.register(name("device_power"), "Device power usage", device_power.clone());
        reg.register(name("device_speed"), "Device speed per algorithm", device_speed.clone());
        reg.register(
            name("device_status_info"),
            "Device status, always 1",
            device_status_info.clone(),
        );
        reg.register(name("rig_status_time"), "Rig status timestamp", rig_status_time.clone());
        reg.register(name("rig_join_time"), "Rig join timestamp", rig_join_time.clone());

        let mut rate_gauges: Vec<(String, FloatGauge)> = Vec::with_capacity(rates.len());
        for pair in rates {
            if rate_gauges.iter().any(|(p, _)| p == pair) {
                continue;
            }

            let gauge = FloatGauge::default();
            reg.register(
                name(&format!("{}_rate", pair.to_lowercase())),
                format!("Exchange rate for {}", pair),
                gauge.clone(),
            );
            rate_gauges.push((pair.clone(), gauge));
        }

        Self {
            total_rigs,
            total_devices,
            total_profitability,
            unpaid_amount,
            total_btc,
            rates: rate_gauges,
            miner_statuses,
            devices_statuses,
            device_temp,
            device_load,
            device_power,
            device_speed,
            device_status_info,
            rig_status_time,
            rig_join_time,
        }
    }

    /// Replace all rig and device metrics with values from the provided response.
    ///
    /// A rig or device that can't be decoded is skipped (and reported) while its
    /// siblings are still exported. A field that can't be converted to a number
    /// skips only the metric derived from it.
    pub fn mining_rigs(&self, rigs: &MiningRigs) -> BatchReport {
        let mut report = BatchReport::default();
        self.reset_fleet();

        let fleet = |field: &'static str| Point::new(Entity::Fleet, "fleet", field);
        fleet("totalRigs").write(&mut report, &rigs.total_rigs, |v| {
            self.total_rigs.set(v);
        });
        fleet("totalDevices").write(&mut report, &rigs.total_devices, |v| {
            self.total_devices.set(v);
        });
        fleet("totalProfitability").write(&mut report, &rigs.total_profitability, |v| {
            self.total_profitability.set(v);
        });
        fleet("unpaidAmount").write(&mut report, &rigs.unpaid_amount, |v| {
            self.unpaid_amount.set(v);
        });

        for (status, count) in &rigs.miner_statuses {
            fleet("minerStatuses").write(&mut report, count, |v| {
                self.miner_statuses
                    .get_or_create(&StatusLabels {
                        status: status.as_str().into(),
                    })
                    .set(v);
            });
        }

        for (status, count) in &rigs.devices_statuses {
            fleet("devicesStatuses").write(&mut report, count, |v| {
                self.devices_statuses
                    .get_or_create(&StatusLabels {
                        status: status.as_str().into(),
                    })
                    .set(v);
            });
        }

        for raw in &rigs.mining_rigs {
            match Rig::deserialize(raw) {
                Ok(rig) => self.rig(&rig, &mut report),
                Err(e) => report.failed(RecordFailure::shape(Entity::Rig, record_id(raw, "rigId"), e, raw)),
            }
        }

        report
    }

    /// Set the BTC balance from the provided wallet response.
    pub fn wallet(&self, wallet: &Wallet) -> BatchReport {
        let mut report = BatchReport::default();
        Point::new(Entity::Wallet, wallet.currency(), "totalBalance").write(&mut report, wallet.balance(), |v| {
            self.total_btc.set(v);
        });

        report
    }

    /// Set each configured exchange rate that is present in the provided response.
    ///
    /// Configured pairs missing from the response keep whatever value they had before.
    pub fn exchange_rates(&self, rates: &ExchangeRates) -> BatchReport {
        let mut report = BatchReport::default();
        for (pair, gauge) in &self.rates {
            match rates.get(pair) {
                Some(value) => Point::new(Entity::Rate, pair, "rate").write(&mut report, value, |v| {
                    gauge.set(v);
                }),
                None => report.failed(RecordFailure::missing(Entity::Rate, pair)),
            }
        }

        report
    }

    fn rig(&self, rig: &Rig, report: &mut BatchReport) {
        let rig_name = LabelText::from(rig.name.clone().unwrap_or_default());
        let labels = RigLabels {
            rig_name: rig_name.clone(),
            rig_id: rig.rig_id.as_str().into(),
        };

        Point::new(Entity::Rig, &rig.rig_id, "statusTime").write(report, &rig.status_time, |v| {
            self.rig_status_time.get_or_create(&labels).set(v);
        });
        Point::new(Entity::Rig, &rig.rig_id, "joinTime").write(report, &rig.join_time, |v| {
            self.rig_join_time.get_or_create(&labels).set(v);
        });

        for raw in &rig.devices {
            match Device::deserialize(raw) {
                Ok(device) => self.device(&rig_name, &device, report),
                Err(e) => report.failed(RecordFailure::shape(Entity::Device, record_id(raw, "id"), e, raw)),
            }
        }
    }

    fn device(&self, rig_name: &LabelText, device: &Device, report: &mut BatchReport) {
        let labels = DeviceLabels {
            rig_name: rig_name.clone(),
            device_name: device.name.clone().unwrap_or_default().into(),
            device_id: device.id.as_str().into(),
            device_type: device.device_type.enum_name.as_str().into(),
        };

        let point = |field: &'static str| Point::new(Entity::Device, &device.id, field);
        point("temperature").write(report, &device.temperature, |v| {
            self.device_temp.get_or_create(&labels).set(v);
        });
        point("load").write(report, &device.load, |v| {
            self.device_load.get_or_create(&labels).set(v);
        });
        point("powerUsage").write(report, &device.power_usage, |v| {
            self.device_power.get_or_create(&labels).set(v);
        });

        self.device_status_info
            .get_or_create(&DeviceStatusLabels {
                rig_name: labels.rig_name.clone(),
                device_name: labels.device_name.clone(),
                device_id: labels.device_id.clone(),
                device_type: labels.device_type.clone(),
                status: device.status.enum_name.as_str().into(),
            })
            .set(1.0);
        report.wrote();

        for speed in &device.speeds {
            let speed_labels = SpeedLabels {
                rig_name: labels.rig_name.clone(),
                device_name: labels.device_name.clone(),
                device_id: labels.device_id.clone(),
                device_type: labels.device_type.clone(),
                algo: speed.algorithm.as_str().into(),
                suffix: speed.display_suffix.clone().unwrap_or_default().into(),
            };

            let id = format!("{}/{}", device.id, speed.algorithm);
            Point::new(Entity::Speed, &id, "speed").write(report, &speed.speed, |v| {
                self.device_speed.get_or_create(&speed_labels).set(v);
            });
        }
    }

    fn reset_fleet(&self) {
        self.miner_statuses.clear();
        self.devices_statuses.clear();
        self.device_temp.clear();
        self.device_load.clear();
        self.device_power.clear();
        self.device_speed.clear();
        self.device_status_info.clear();
        self.rig_status_time.clear();
        self.rig_join_time.clear();
    }
}

/// Identity of a single metric write, used to report it if the value can't be used.
struct Point<'a> {
    entity: Entity,
    id: &'a str,
    field: &'static str,
}

impl<'a> Point<'a> {
    fn new(entity: Entity, id: &'a str, field: &'static str) -> Self {
        Point { entity, id, field }
    }

    fn write<F>(&self, report: &mut BatchReport, value: &Value, set: F)
    where
        F: FnOnce(f64),
    {
        match coerce(value) {
            Some(v) => {
                set(v);
                report.wrote();
            }
            None => report.failed(RecordFailure::not_numeric(self.entity, self.id, self.field, value)),
        }
    }
}

/// Convert a JSON number or numeric string to a finite float.
pub fn coerce(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

fn record_id(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => "unknown".to_owned(),
    }
}

/// Metrics about the exporter itself rather than the mining fleet.
///
/// Refresh metrics share the same prefix as `FleetMetrics`. Process metrics use their
/// own prefix so they can be kept consistent with other exporters.
#[derive(Debug)]
pub struct ExporterMetrics {
    last_refresh: FloatGauge,
    fetch_errors: Family<BatchLabels, Counter>,
    skipped_records: Family<EntityLabels, Counter>,
}

impl ExporterMetrics {
    pub fn new(reg: &mut Registry, prefix: &str, process_prefix: &str) -> Self {
        let last_refresh = FloatGauge::default();
        let fetch_errors = Family::<BatchLabels, Counter>::default();
        let skipped_records = Family::<EntityLabels, Counter>::default();
        let start_time = FloatGauge::default();
        start_time.set(unix_seconds());
        let build = Info::new(vec![("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned())]);

        reg.register(
            format!("{}last_refresh_timestamp_seconds", prefix),
            "Unix time of the last completed refresh",
            last_refresh.clone(),
        );
        reg.register(
            format!("{}fetch_errors", prefix),
            "Failed API requests by batch",
            fetch_errors.clone(),
        );
        reg.register(
            format!("{}skipped_records", prefix),
            "Records skipped while updating metrics by kind",
            skipped_records.clone(),
        );
        reg.register(
            format!("{}process_start_time_seconds", process_prefix),
            "Start time of the process since unix epoch in seconds",
            start_time,
        );
        reg.register(format!("{}exporter_build", process_prefix), "Exporter build information", build);

        Self {
            last_refresh,
            fetch_errors,
            skipped_records,
        }
    }

    pub fn fetch_failed(&self, batch: &str) {
        self.fetch_errors
            .get_or_create(&BatchLabels {
                batch: batch.to_owned(),
            })
            .inc();
    }

    pub fn cycle_complete(&self, report: &CycleReport) {
        for failure in report.failures() {
            self.skipped_records
                .get_or_create(&EntityLabels {
                    entity: failure.entity.as_str().to_owned(),
                })
                .inc();
        }

        self.last_refresh.set(unix_seconds());
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
