use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Delivery status as the backend reports it, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    OnProcess,
    Delivered,
    Other(String),
}

impl OrderStatus {
    pub fn from_str(s: &str) -> Self {
        match normalize_status(s).as_str() {
            "pending" => OrderStatus::Pending,
            "on process" | "in process" | "in progress" => OrderStatus::OnProcess,
            "delivered" => OrderStatus::Delivered,
            _ => OrderStatus::Other(s.trim().to_string()),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::OnProcess => "On Process",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Other(s) => s.as_str(),
        };
        // pad honors width and alignment flags
        f.pad(label)
    }
}

fn normalize_status(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub pickup_address: String,
    #[serde(default)]
    pub delivery_address: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    pub weight: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        OrderStatus::from_str(&self.status)
    }

    /// "pickup → delivery" line for list views
    pub fn route(&self) -> String {
        format!("{} → {}", self.pickup_address, self.delivery_address)
    }

    pub fn created_display(&self) -> String {
        self.created_at
            .map(|dt| dt.format("%b %d, %Y").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Body for `POST /orders`
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewOrder {
    pub pickup_address: String,
    pub delivery_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl NewOrder {
    pub fn new(pickup_address: impl Into<String>, delivery_address: impl Into<String>) -> Self {
        Self {
            pickup_address: pickup_address.into(),
            delivery_address: delivery_address.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub order: Order,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdersResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
}

/// Status + tracking-number filter applied to an order list.
///
/// A status of `None` or "All" keeps every order. The query matches any order
/// whose id contains it as a substring.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub query: String,
}

impl OrderFilter {
    pub fn new(status: Option<&str>, query: &str) -> Self {
        Self {
            status: status.map(str::to_string),
            query: query.to_string(),
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if let Some(ref status) = self.status {
            let wanted = normalize_status(status);
            if wanted != "all" && normalize_status(&order.status) != wanted {
                return false;
            }
        }

        let query = self.query.trim();
        query.is_empty() || order.id.to_string().contains(query)
    }

    pub fn apply<'a>(&self, orders: &'a [Order]) -> Vec<&'a Order> {
        orders.iter().filter(|o| self.matches(o)).collect()
    }
}

// Helper to deserialize string or number as Option<String>
fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumberVisitor;

    impl<'de> de::Visitor<'de> for StringOrNumberVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumberVisitor)
}

// Accepts RFC 3339 or "YYYY-MM-DD HH:MM:SS" (taken as UTC); anything else is None
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
