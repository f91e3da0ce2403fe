use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `0001-01-01T00:00:00Z`, the zero instant upstream producers emit for
/// an unset timestamp.
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

/// A customer purchase as delivered by the feed or the REST endpoint.
///
/// Every field defaults to its empty value when absent from the payload,
/// so a partial message deserializes into an order whose missing fields
/// read as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    /// Store-generated row id, zero until persisted.
    pub id: i64,
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    /// Creation time reported by the source system.
    #[serde(deserialize_with = "unset_time_as_none")]
    pub date_created: Option<DateTime<Utc>>,
    pub oof_shard: String,
    #[serde(deserialize_with = "unset_time_as_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "unset_time_as_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "null_as_default")]
    pub delivery: Delivery,
    #[serde(deserialize_with = "null_as_default")]
    pub payment: Payment,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
}

/// True for the zero instant, which carries no information.
pub fn is_unset_time(time: &DateTime<Utc>) -> bool {
    time.timestamp() == ZERO_INSTANT_SECS
}

fn unset_time_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let time = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(time.filter(|t| !is_unset_time(t)))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Recipient contact and address, one per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment transaction, one per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i32,
    /// Unix seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i32,
    pub goods_total: i32,
    pub custom_fee: i32,
}

/// A line item. `chrt_id` identifies the item within its order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i32,
    pub rid: String,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: i32,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}
