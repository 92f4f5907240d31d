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

use serde_json::Value;
use std::fmt;

/// Kind of record that a metric write was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Fleet,
    Rig,
    Device,
    Speed,
    Wallet,
    Rate,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fleet => "fleet",
            Self::Rig => "rig",
            Self::Device => "device",
            Self::Speed => "speed",
            Self::Wallet => "wallet",
            Self::Rate => "rate",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum FailureCause {
    /// The record was missing a required field or had one of the wrong type.
    Shape(serde_json::Error),
    /// A field expected to hold a number held something that isn't a finite number.
    NotNumeric { field: &'static str, value: String },
    /// The record wasn't present in the response at all.
    Missing,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(e) => write!(f, "malformed record: {}", e),
            Self::NotNumeric { field, value } => write!(f, "non-numeric value {} for {}", value, field),
            Self::Missing => write!(f, "not present in response"),
        }
    }
}

/// A single record (or field of a record) that was skipped while updating metrics.
#[derive(Debug)]
pub struct RecordFailure {
    pub entity: Entity,
    pub id: String,
    pub cause: FailureCause,
    pub record: Option<String>,
}

impl RecordFailure {
    pub fn shape<S: Into<String>>(entity: Entity, id: S, err: serde_json::Error, record: &Value) -> Self {
        RecordFailure {
            entity,
            id: id.into(),
            cause: FailureCause::Shape(err),
            record: Some(record.to_string()),
        }
    }

    pub fn not_numeric<S: Into<String>>(entity: Entity, id: S, field: &'static str, value: &Value) -> Self {
        RecordFailure {
            entity,
            id: id.into(),
            cause: FailureCause::NotNumeric {
                field,
                value: value.to_string(),
            },
            record: None,
        }
    }

    pub fn missing<S: Into<String>>(entity: Entity, id: S) -> Self {
        RecordFailure {
            entity,
            id: id.into(),
            cause: FailureCause::Missing,
            record: None,
        }
    }

    pub fn log(&self) {
        match &self.cause {
            FailureCause::Shape(_) => tracing::warn!(
                message = "skipped malformed record",
                entity = %self.entity,
                id = %self.id,
                error = %self.cause,
                record = self.record.as_deref().unwrap_or(""),
            ),
            FailureCause::NotNumeric { .. } => tracing::debug!(
                message = "skipped non-numeric value",
                entity = %self.entity,
                id = %self.id,
                error = %self.cause,
            ),
            FailureCause::Missing => tracing::warn!(
                message = "record missing from response",
                entity = %self.entity,
                id = %self.id,
            ),
        }
    }
}

/// Outcome of applying one batch (rigs, wallet, or exchange rates) to metrics.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn wrote(&mut self) {
        self.written += 1;
    }

    pub fn failed(&mut self, failure: RecordFailure) {
        self.failures.push(failure);
    }

    /// Failures for a particular kind of record
    pub fn failures_for(&self, entity: Entity) -> impl Iterator<Item = &RecordFailure> {
        self.failures.iter().filter(move |f| f.entity == entity)
    }
}

/// Outcome of a full refresh cycle. A batch is `None` when it couldn't be fetched,
/// in which case the metrics derived from it were left untouched.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub mining_rigs: Option<BatchReport>,
    pub wallet: Option<BatchReport>,
    pub exchange_rates: Option<BatchReport>,
}

impl CycleReport {
    pub fn batches(&self) -> impl Iterator<Item = (&'static str, &BatchReport)> {
        [
            ("mining_rigs", self.mining_rigs.as_ref()),
            ("wallet", self.wallet.as_ref()),
            ("exchange_rates", self.exchange_rates.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, batch)| batch.map(|b| (name, b)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordFailure> {
        self.batches().flat_map(|(_, b)| b.failures.iter())
    }

    pub fn log(&self) {
        for failure in self.failures() {
            failure.log();
        }

        for (batch, report) in self.batches() {
            tracing::info!(
                message = "updated metrics",
                batch = batch,
                written = report.written,
                skipped = report.failures.len(),
            );
        }
    }
}
