//! Feishu (Lark) spreadsheet client
//!
//! Authenticates as an internal app with a tenant access token, which is
//! cached until shortly before it expires.

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SheetsError};

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";
pub const APP_ID_VAR: &str = "FEISHU_APP_ID";
pub const APP_SECRET_VAR: &str = "FEISHU_APP_SECRET";
pub const BASE_URL_VAR: &str = "FEISHU_BASE_URL";

/// Refresh the token this long before Feishu says it expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SheetsCredentials {
    pub app_id: String,
    pub app_secret: String,
    pub base_url: String,
}

impl std::fmt::Debug for SheetsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl SheetsCredentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Read `FEISHU_APP_ID`, `FEISHU_APP_SECRET` and optionally `FEISHU_BASE_URL`
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SheetsError::Credentials(format!("{} is not set", name)))
        };
        let mut credentials = Self::new(var(APP_ID_VAR)?, var(APP_SECRET_VAR)?);
        if let Ok(base_url) = std::env::var(BASE_URL_VAR) {
            if !base_url.trim().is_empty() {
                credentials.base_url = base_url;
            }
        }
        Ok(credentials)
    }
}

/// Which sheet of a spreadsheet to operate on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetRef {
    Id(String),
    /// Resolved to an id through [`SheetsClient::sheet_map`]
    Name(String),
}

impl SheetRef {
    /// Prefer the id when both are given
    pub fn from_options(id: Option<String>, name: Option<String>) -> Result<Self> {
        match (id, name) {
            (Some(id), _) if !id.is_empty() => Ok(Self::Id(id)),
            (_, Some(name)) if !name.is_empty() => Ok(Self::Name(name)),
            _ => Err(SheetsError::MissingSheet),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsertDataOption {
    #[default]
    Overwrite,
    InsertRows,
}

impl InsertDataOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "OVERWRITE",
            Self::InsertRows => "INSERT_ROWS",
        }
    }
}

impl std::str::FromStr for InsertDataOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OVERWRITE" => Ok(Self::Overwrite),
            "INSERT_ROWS" => Ok(Self::InsertRows),
            other => Err(format!(
                "unknown insert option '{}', expected OVERWRITE or INSERT_ROWS",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub sheet_id: String,
    pub title: String,
    #[serde(default)]
    pub index: u32,
    /// "sheet" for regular grids; bitables and other embeds report other types
    #[serde(default)]
    pub resource_type: String,
}

/// Sheet contents with the first row taken as the header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn from_values(values: Vec<Vec<Value>>) -> Self {
        let mut values = values.into_iter();
        let Some(header) = values.next() else {
            return Self::default();
        };
        let columns: Vec<String> = header.iter().map(render_cell).collect();
        let rows = values
            .map(|row| {
                let mut cells: Vec<String> = row.iter().map(render_cell).collect();
                if cells.len() < columns.len() {
                    cells.resize(columns.len(), String::new());
                }
                cells
            })
            .collect();
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_column(column: &str) -> Result<()> {
    if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SheetsError::InvalidColumn(column.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

// ── Feishu wire types ──

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SheetsQueryData {
    #[serde(default)]
    sheets: Vec<SheetInfo>,
}

#[derive(Debug, Deserialize)]
struct SheetGetData {
    sheet: SheetInfo,
}

#[derive(Debug, Default, Deserialize)]
struct ValuesData {
    #[serde(default, rename = "valueRange")]
    value_range: Option<ValueRange>,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Option<Vec<Vec<Value>>>,
}

/// Feishu spreadsheet API client
#[derive(Clone)]
pub struct SheetsClient {
    credentials: SheetsCredentials,
    http: Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl SheetsClient {
    pub fn new(credentials: SheetsCredentials) -> Self {
        Self {
            credentials,
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.credentials.base_url.trim_end_matches('/'), path)
    }

    /// Tenant access token, fetched on first use and cached until it nears expiry
    pub async fn tenant_access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.refresh_at {
                return Ok(token.token.clone());
            }
            debug!("Cached tenant access token expired, refreshing");
        }

        let response = self
            .http
            .post(self.url("auth/v3/tenant_access_token/internal"))
            .json(&serde_json::json!({
                "app_id": self.credentials.app_id,
                "app_secret": self.credentials.app_secret,
            }))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SheetsError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| SheetsError::Decode(format!("token response: {}", e)))?;
        if body.code != 0 {
            return Err(SheetsError::Api {
                code: body.code,
                msg: body.msg,
            });
        }
        let token = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SheetsError::Decode("token response had no tenant_access_token".into()))?;

        let lifetime = TimeDelta::try_seconds(body.expire - TOKEN_REFRESH_MARGIN_SECS)
            .unwrap_or_else(TimeDelta::zero);
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: Utc::now() + lifetime,
        });
        info!("Obtained Feishu tenant access token (expires in {}s)", body.expire);
        Ok(token)
    }

    /// Authenticated request; returns the envelope's `data`
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.tenant_access_token().await?;
        let mut builder = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&token)
            .query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SheetsError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!("Feishu response for {}: {}", path, text);

        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| SheetsError::Decode(format!("{}: {}", path, e)))?;
        if envelope.code != 0 {
            return Err(SheetsError::Api {
                code: envelope.code,
                msg: envelope.msg,
            });
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    fn decode<T: for<'de> Deserialize<'de>>(data: Value, what: &str) -> Result<T> {
        serde_json::from_value(data).map_err(|e| SheetsError::Decode(format!("{}: {}", what, e)))
    }

    /// All sheets of a spreadsheet, in workbook order
    pub async fn list_sheets(&self, spreadsheet: &str) -> Result<Vec<SheetInfo>> {
        let path = format!("sheets/v3/spreadsheets/{}/sheets/query", spreadsheet);
        let data = self.request(Method::GET, &path, &[], None).await?;
        let mut sheets = if data.is_null() {
            Vec::new()
        } else {
            Self::decode::<SheetsQueryData>(data, "sheets query")?.sheets
        };
        sheets.sort_by_key(|s| s.index);
        debug!("Spreadsheet {} has {} sheet(s)", spreadsheet, sheets.len());
        Ok(sheets)
    }

    /// Sheet title to sheet id
    pub async fn sheet_map(&self, spreadsheet: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .list_sheets(spreadsheet)
            .await?
            .into_iter()
            .map(|s| (s.title, s.sheet_id))
            .collect())
    }

    async fn resolve(&self, spreadsheet: &str, sheet: &SheetRef) -> Result<String> {
        match sheet {
            SheetRef::Id(id) => Ok(id.clone()),
            SheetRef::Name(name) => self
                .sheet_map(spreadsheet)
                .await?
                .remove(name)
                .ok_or_else(|| SheetsError::SheetNotFound(name.clone())),
        }
    }

    pub async fn sheet_info(&self, spreadsheet: &str, sheet_id: &str) -> Result<SheetInfo> {
        let path = format!("sheets/v3/spreadsheets/{}/sheets/{}", spreadsheet, sheet_id);
        let data = self.request(Method::GET, &path, &[], None).await?;
        Ok(Self::decode::<SheetGetData>(data, "sheet info")?.sheet)
    }

    /// Read a whole sheet; only regular grid sheets can be read
    pub async fn read_sheet(&self, spreadsheet: &str, sheet: &SheetRef) -> Result<Table> {
        let sheet_id = self.resolve(spreadsheet, sheet).await?;

        let info = self.sheet_info(spreadsheet, &sheet_id).await?;
        if info.resource_type != "sheet" {
            return Err(SheetsError::NotASheet(info.resource_type));
        }

        let path = format!("sheets/v2/spreadsheets/{}/values/{}", spreadsheet, sheet_id);
        let data = self
            .request(
                Method::GET,
                &path,
                &[
                    ("valueRenderOption", "ToString"),
                    ("dateTimeRenderOption", "FormattedString"),
                ],
                None,
            )
            .await?;
        let values = if data.is_null() {
            None
        } else {
            Self::decode::<ValuesData>(data, "values")?
                .value_range
                .and_then(|r| r.values)
        };

        match values {
            Some(values) if !values.is_empty() => {
                let table = Table::from_values(values);
                info!(
                    "Read {} row(s) x {} column(s) from sheet {}",
                    table.len(),
                    table.columns.len(),
                    sheet_id
                );
                Ok(table)
            }
            _ => {
                warn!("No data returned for sheet {}", sheet_id);
                Ok(Table::default())
            }
        }
    }

    /// Append `value` below the last filled cell of `column`
    pub async fn append_cell(
        &self,
        spreadsheet: &str,
        sheet: &SheetRef,
        column: &str,
        value: &str,
        option: InsertDataOption,
    ) -> Result<Value> {
        validate_column(column)?;
        let sheet_id = self.resolve(spreadsheet, sheet).await?;

        let path = format!("sheets/v2/spreadsheets/{}/values_append", spreadsheet);
        let body = serde_json::json!({
            "valueRange": {
                "range": format!("{}!{}:{}", sheet_id, column, column),
                "values": [[value]],
            }
        });
        let data = self
            .request(
                Method::POST,
                &path,
                &[("insertDataOption", option.as_str())],
                Some(&body),
            )
            .await?;
        info!("Appended a cell to column {} of sheet {}", column, sheet_id);
        Ok(data)
    }
}
