use async_trait::async_trait;
use dashboard_core::{Filter, Row, RowQuery, RowStore, StoreError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const CLIENT_INFO: &str = "market-monitor-dashboard";

/// Connection settings for the REST row store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl StoreConfig {
    /// Reads `DASHBOARD_STORE_URL` / `DASHBOARD_STORE_KEY`. Returns `None`
    /// when either is unset, which callers treat as offline mode.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let url = lookup("DASHBOARD_STORE_URL").filter(|v| !v.trim().is_empty())?;
        let api_key = lookup("DASHBOARD_STORE_KEY").filter(|v| !v.trim().is_empty())?;
        let timeout_secs: u64 = lookup("DASHBOARD_STORE_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(15);

        Some(Self {
            url: url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Read-only client for a PostgREST-style row store.
#[derive(Clone)]
pub struct RestStoreClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl RestStoreClient {
    pub fn new(config: &StoreConfig) -> Self {
        // Timeouts are owned by the HTTP client; the aggregation layer never cancels.
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            client,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

#[async_trait]
impl RowStore for RestStoreClient {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Row>, StoreError> {
        let params = query_params(query);
        tracing::debug!("Store read {} ({} params)", query.table, params.len());

        let response = self
            .client
            .get(self.table_url(&query.table))
            .query(&params)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("x-client-info", CLIENT_INFO)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error(status.as_u16(), &body));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

/// Render a query as PostgREST parameters.
pub(crate) fn query_params(query: &RowQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let select = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(",")
    };
    params.push(("select".to_string(), select));

    for filter in &query.filters {
        let rendered = match filter {
            Filter::Eq(_, value) => format!("eq.{}", render_value(value)),
            Filter::Gte(_, value) => format!("gte.{}", render_value(value)),
            Filter::In(_, values) => {
                let items: Vec<String> = values.iter().map(render_list_item).collect();
                format!("in.({})", items.join(","))
            }
        };
        params.push((filter.column().to_string(), rendered));
    }

    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.descending { "desc" } else { "asc" }))
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn render_list_item(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => render_value(other),
    }
}

/// 42703 is Postgres' undefined_column; PGRST204 is PostgREST's schema-cache miss.
pub(crate) fn map_error(status: u16, body: &str) -> StoreError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(err) => (err.code.unwrap_or_default(), err.message.unwrap_or_else(|| body.to_string())),
        None => (String::new(), body.to_string()),
    };

    let missing_column = code == "42703" || code == "PGRST204" || message.contains("does not exist");
    if missing_column && message.contains("column") {
        return StoreError::MissingColumn { column: extract_column(&message) };
    }

    if status == 503 || status == 502 {
        return StoreError::Unavailable(message);
    }

    StoreError::Status { status, message }
}

fn extract_column(message: &str) -> String {
    // "column stock_opportunities_v2.evidence_ids does not exist"
    // "Could not find the 'path_ids' column of 'stock_opportunities_v2' in the schema cache"
    if let Some(rest) = message.split("column ").nth(1) {
        if let Some(name) = rest.split(" does not exist").next() {
            if !name.is_empty() && !name.contains(' ') {
                return name.to_string();
            }
        }
    }
    if let Some(rest) = message.split('\'').nth(1) {
        return rest.to_string();
    }
    message.to_string()
}
