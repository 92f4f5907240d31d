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

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::error;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const HEADER_TIME: &str = "X-Time";
const HEADER_NONCE: &str = "X-Nonce";
const HEADER_REQUEST_ID: &str = "X-Request-Id";
const HEADER_ORGANIZATION_ID: &str = "X-Organization-Id";
const HEADER_AUTH: &str = "X-Auth";

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    Unauthorized(StatusCode, Url),
    Unexpected(StatusCode, Url),
    Timeout(Duration),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Unauthorized(status, url) => write!(f, "credentials rejected with status {} for {}", status, url),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Timeout(d) => write!(f, "request timed out after {}ms", d.as_millis()),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of the three independent data sets a refresh cycle is built from.
///
/// `NiceHashClient` is the production implementation. Each method is a separate
/// request so that the failure of one doesn't prevent the others from being used.
#[async_trait]
pub trait FleetSource: Send + Sync {
    /// Rig inventory along with aggregate counts for the organization.
    async fn mining_rigs(&self) -> Result<MiningRigs, ClientError>;

    /// Balance of the BTC wallet.
    async fn wallet(&self) -> Result<Wallet, ClientError>;

    /// Current exchange rates, keyed by currency pair (e.g. "BTCUSDC").
    async fn exchange_rates(&self) -> Result<ExchangeRates, ClientError>;
}

/// API key, secret, and organization used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    org_id: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(api_key: S, api_secret: S, org_id: S) -> Self {
        Credentials {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            org_id: org_id.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("org_id", &self.org_id)
            .finish()
    }
}

#[derive(Debug)]
pub struct NiceHashClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
}

impl NiceHashClient {
    const USER_AGENT: &'static str = concat!("nicehash_exporter/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";
    const RIGS_PATH: &'static str = "/main/api/v2/mining/rigs2";
    const WALLET_PATH: &'static str = "/main/api/v2/accounting/account2/BTC";
    const RATES_PATH: &'static str = "/main/api/v2/exchangeRate/list";

    pub fn new(client: Client, base_url: Url, credentials: Credentials) -> Self {
        NiceHashClient {
            client,
            base_url,
            credentials,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, signed: bool) -> Result<T, ClientError> {
        let res = self.make_request(url, signed).await?;
        res.json::<T>().await.map_err(ClientError::Internal)
    }

    async fn make_request(&self, url: Url, signed: bool) -> Result<Response, ClientError> {
        let mut req = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE);

        if signed {
            req = self.sign("GET", &url, req);
        }

        let res = req.send().await.map_err(ClientError::Internal)?;
        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ClientError::Unauthorized(status, url))
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn sign(&self, method: &str, url: &Url, req: RequestBuilder) -> RequestBuilder {
        let time = timestamp_millis().to_string();
        let nonce = Uuid::new_v4().to_string();
        let query = url.query().unwrap_or("");
        let digest = signature(
            &self.credentials.api_secret,
            &[
                Some(self.credentials.api_key.as_str()),
                Some(time.as_str()),
                Some(nonce.as_str()),
                None,
                Some(self.credentials.org_id.as_str()),
                None,
                Some(method),
                Some(url.path()),
                Some(query),
            ],
        );

        req.header(HEADER_TIME, &time)
            .header(HEADER_NONCE, &nonce)
            .header(HEADER_REQUEST_ID, Uuid::new_v4().to_string())
            .header(HEADER_ORGANIZATION_ID, &self.credentials.org_id)
            .header(HEADER_AUTH, format!("{}:{}", self.credentials.api_key, digest))
    }

    fn endpoint_url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        url
    }
}

#[async_trait]
impl FleetSource for NiceHashClient {
    async fn mining_rigs(&self) -> Result<MiningRigs, ClientError> {
        let url = self.endpoint_url(Self::RIGS_PATH, &[]);
        tracing::debug!(message = "making mining rigs request", url = %url);
        self.get_json(url, true).await
    }

    async fn wallet(&self) -> Result<Wallet, ClientError> {
        let url = self.endpoint_url(Self::WALLET_PATH, &[("extendedResponse", "true")]);
        tracing::debug!(message = "making wallet request", url = %url);
        self.get_json(url, true).await
    }

    async fn exchange_rates(&self) -> Result<ExchangeRates, ClientError> {
        let url = self.endpoint_url(Self::RATES_PATH, &[]);
        tracing::debug!(message = "making exchange rates request", url = %url);
        self.get_json(url, false).await
    }
}

/// Compute the hex encoded HMAC-SHA256 request signature over the given segments.
///
/// Segments are separated by a single zero byte. A `None` segment contributes no
/// bytes of its own but is still separated from its neighbors.
pub fn signature(secret: &str, segments: &[Option<&str>]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            mac.update(&[0]);
        }

        if let Some(s) = segment {
            mac.update(s.as_bytes());
        }
    }

    hex::encode(mac.finalize().into_bytes())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Decode an explicit `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Response from the rigs endpoint.
///
/// Individual rigs are kept as raw JSON so that each one can be decoded (and fail to
/// decode) independently of its siblings. See `Rig` and `Device`.
#[derive(Deserialize, Debug, Default)]
pub struct MiningRigs {
    #[serde(alias = "totalRigs", default)]
    pub total_rigs: Value,
    #[serde(alias = "totalDevices", default)]
    pub total_devices: Value,
    #[serde(alias = "totalProfitability", default)]
    pub total_profitability: Value,
    #[serde(alias = "unpaidAmount", default)]
    pub unpaid_amount: Value,
    #[serde(alias = "minerStatuses", default, deserialize_with = "null_as_default")]
    pub miner_statuses: Map<String, Value>,
    #[serde(alias = "devicesStatuses", default, deserialize_with = "null_as_default")]
    pub devices_statuses: Map<String, Value>,
    #[serde(alias = "miningRigs", default, deserialize_with = "null_as_default")]
    pub mining_rigs: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub struct Rig {
    #[serde(alias = "rigId")]
    pub rig_id: String,
    #[serde(alias = "name", default)]
    pub name: Option<String>,
    #[serde(alias = "statusTime", default)]
    pub status_time: Value,
    #[serde(alias = "joinTime", default)]
    pub join_time: Value,
    #[serde(alias = "softwareVersions", default)]
    pub software_versions: Option<String>,
    #[serde(alias = "devices", default, deserialize_with = "null_as_default")]
    pub devices: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub struct Device {
    #[serde(alias = "id")]
    pub id: String,
    #[serde(alias = "name", default)]
    pub name: Option<String>,
    #[serde(alias = "deviceType")]
    pub device_type: EnumTag,
    #[serde(alias = "status")]
    pub status: EnumTag,
    #[serde(alias = "temperature", default)]
    pub temperature: Value,
    #[serde(alias = "load", default)]
    pub load: Value,
    #[serde(alias = "powerUsage", default)]
    pub power_usage: Value,
    #[serde(alias = "speeds", default, deserialize_with = "null_as_default")]
    pub speeds: Vec<SpeedSample>,
}

#[derive(Deserialize, Debug)]
pub struct EnumTag {
    #[serde(alias = "enumName")]
    pub enum_name: String,
}

#[derive(Deserialize, Debug)]
pub struct SpeedSample {
    #[serde(alias = "algorithm")]
    pub algorithm: String,
    #[serde(alias = "speed", default)]
    pub speed: Value,
    #[serde(alias = "displaySuffix", default)]
    pub display_suffix: Option<String>,
}

/// Response from the wallet endpoint.
///
/// Extended responses nest the balance under `total`, older responses carry it at
/// the top level. `Wallet::balance()` prefers the nested value.
#[derive(Deserialize, Debug, Default)]
pub struct Wallet {
    #[serde(alias = "currency", default)]
    pub currency: Option<String>,
    #[serde(alias = "total", default)]
    pub total: Option<WalletTotal>,
    #[serde(alias = "totalBalance", default)]
    pub total_balance: Value,
}

#[derive(Deserialize, Debug, Default)]
pub struct WalletTotal {
    #[serde(alias = "currency", default)]
    pub currency: Option<String>,
    #[serde(alias = "totalBalance", default)]
    pub total_balance: Value,
}

impl Wallet {
    pub fn balance(&self) -> &Value {
        match &self.total {
            Some(t) if !t.total_balance.is_null() => &t.total_balance,
            _ => &self.total_balance,
        }
    }

    pub fn currency(&self) -> &str {
        self.total
            .as_ref()
            .and_then(|t| t.currency.as_deref())
            .or(self.currency.as_deref())
            .unwrap_or("BTC")
    }
}

/// Exchange rates keyed by currency pair code, e.g. "BTCUSDC".
///
/// Accepts either a flat mapping of pair to rate or a `list` of entries with
/// separate `fromCurrency` and `toCurrency` fields, which are concatenated to
/// form the pair code.
#[derive(Deserialize, Debug, Default)]
#[serde(from = "RatesResponse")]
pub struct ExchangeRates {
    rates: Map<String, Value>,
}

impl ExchangeRates {
    pub fn get(&self, pair: &str) -> Option<&Value> {
        self.rates.get(pair)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RatesResponse {
    List { list: Vec<RateEntry> },
    Flat(Map<String, Value>),
}

#[derive(Deserialize)]
struct RateEntry {
    #[serde(alias = "fromCurrency")]
    from_currency: String,
    #[serde(alias = "toCurrency")]
    to_currency: String,
    #[serde(alias = "exchangeRate", default)]
    exchange_rate: Value,
}

impl From<RatesResponse> for ExchangeRates {
    fn from(res: RatesResponse) -> Self {
        match res {
            RatesResponse::Flat(rates) => ExchangeRates { rates },
            RatesResponse::List { list } => ExchangeRates {
                rates: list
                    .into_iter()
                    .map(|e| (format!("{}{}", e.from_currency, e.to_currency), e.exchange_rate))
                    .collect(),
            },
        }
    }
}
