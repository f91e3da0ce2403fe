use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderhub_core::repository::{OrderStore, StoreError, StoreResult};
use orderhub_shared::{Delivery, Item, Order, Payment};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error};

/// PostgreSQL-backed order store. Every write runs in a single transaction
/// covering the order row, its delivery, payment and items.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Root order joined with its optional delivery and payment rows.
const SELECT_ORDER: &str = r#"
    SELECT
        o.id, o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
        o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created,
        o.oof_shard, o.created_at, o.updated_at,
        COALESCE(d.name, '') AS delivery_name,
        COALESCE(d.phone, '') AS delivery_phone,
        COALESCE(d.zip, '') AS delivery_zip,
        COALESCE(d.city, '') AS delivery_city,
        COALESCE(d.address, '') AS delivery_address,
        COALESCE(d.region, '') AS delivery_region,
        COALESCE(d.email, '') AS delivery_email,
        COALESCE(p.transaction, '') AS payment_transaction,
        COALESCE(p.request_id, '') AS payment_request_id,
        COALESCE(p.currency, '') AS payment_currency,
        COALESCE(p.provider, '') AS payment_provider,
        COALESCE(p.amount, 0) AS payment_amount,
        COALESCE(p.payment_dt, 0) AS payment_dt,
        COALESCE(p.bank, '') AS payment_bank,
        COALESCE(p.delivery_cost, 0) AS payment_delivery_cost,
        COALESCE(p.goods_total, 0) AS payment_goods_total,
        COALESCE(p.custom_fee, 0) AS payment_custom_fee
    FROM orders o
    LEFT JOIN delivery d ON o.id = d.order_id
    LEFT JOIN payment p ON o.id = p.order_id
"#;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: Option<DateTime<Utc>>,
    oof_shard: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    delivery_name: String,
    delivery_phone: String,
    delivery_zip: String,
    delivery_city: String,
    delivery_address: String,
    delivery_region: String,
    delivery_email: String,
    payment_transaction: String,
    payment_request_id: String,
    payment_currency: String,
    payment_provider: String,
    payment_amount: i32,
    payment_dt: i64,
    payment_bank: String,
    payment_delivery_cost: i32,
    payment_goods_total: i32,
    payment_custom_fee: i32,
}

impl OrderRow {
    fn into_order(self, items: Vec<Item>) -> Order {
        Order {
            id: self.id,
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
            created_at: self.created_at,
            updated_at: self.updated_at,
            delivery: Delivery {
                name: self.delivery_name,
                phone: self.delivery_phone,
                zip: self.delivery_zip,
                city: self.delivery_city,
                address: self.delivery_address,
                region: self.delivery_region,
                email: self.delivery_email,
            },
            payment: Payment {
                transaction: self.payment_transaction,
                request_id: self.payment_request_id,
                currency: self.payment_currency,
                provider: self.payment_provider,
                amount: self.payment_amount,
                payment_dt: self.payment_dt,
                bank: self.payment_bank,
                delivery_cost: self.payment_delivery_cost,
                goods_total: self.payment_goods_total,
                custom_fee: self.payment_custom_fee,
            },
            items,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_id: i64,
    chrt_id: i64,
    track_number: String,
    price: i32,
    rid: String,
    name: String,
    sale: i32,
    size: String,
    total_price: i32,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            chrt_id: row.chrt_id,
            track_number: row.track_number,
            price: row.price,
            rid: row.rid,
            name: row.name,
            sale: row.sale,
            size: row.size,
            total_price: row.total_price,
            nm_id: row.nm_id,
            brand: row.brand,
            status: row.status,
        }
    }
}

fn backend(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        error!("Postgres {} failed: {}", op, e);
        StoreError::Backend(format!("{}: {}", op, e))
    }
}

// Like `backend`, but a unique-constraint hit means another writer got there first.
fn write_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        let unique = e
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if unique {
            StoreError::Conflict
        } else {
            backend(op)(e)
        }
    }
}

/// Groups the items of `order_ids` by parent, each group in insertion order.
async fn load_items(pool: &PgPool, order_ids: Vec<i64>) -> StoreResult<HashMap<i64, Vec<Item>>> {
    let rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT order_id, chrt_id, track_number, price, rid, name,
               sale, size, total_price, nm_id, brand, status
        FROM items
        WHERE order_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(order_ids)
    .fetch_all(pool)
    .await
    .map_err(backend("load items"))?;

    let mut grouped: HashMap<i64, Vec<Item>> = HashMap::new();
    for row in rows {
        grouped.entry(row.order_id).or_default().push(row.into());
    }
    Ok(grouped)
}

async fn upsert_delivery(conn: &mut PgConnection, order_id: i64, delivery: &Delivery) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery (order_id, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (order_id) DO UPDATE
        SET name = EXCLUDED.name, phone = EXCLUDED.phone, zip = EXCLUDED.zip,
            city = EXCLUDED.city, address = EXCLUDED.address,
            region = EXCLUDED.region, email = EXCLUDED.email
        "#,
    )
    .bind(order_id)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(conn)
    .await
    .map_err(backend("write delivery"))?;
    Ok(())
}

async fn upsert_payment(conn: &mut PgConnection, order_id: i64, payment: &Payment) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payment (order_id, transaction, request_id, currency, provider,
                             amount, payment_dt, bank, delivery_cost, goods_total, custom_fee)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_id) DO UPDATE
        SET transaction = EXCLUDED.transaction, request_id = EXCLUDED.request_id,
            currency = EXCLUDED.currency, provider = EXCLUDED.provider,
            amount = EXCLUDED.amount, payment_dt = EXCLUDED.payment_dt,
            bank = EXCLUDED.bank, delivery_cost = EXCLUDED.delivery_cost,
            goods_total = EXCLUDED.goods_total, custom_fee = EXCLUDED.custom_fee
        "#,
    )
    .bind(order_id)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(conn)
    .await
    .map_err(backend("write payment"))?;
    Ok(())
}

async fn insert_items(conn: &mut PgConnection, order_id: i64, items: &[Item]) -> StoreResult<()> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO items (order_id, chrt_id, track_number, price, rid, name,
                               sale, size, total_price, nm_id, brand, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order_id)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut *conn)
        .await
        .map_err(backend("insert item"))?;
    }
    Ok(())
}

// Empty sub-records are "not provided" and get no row.
async fn write_children(conn: &mut PgConnection, order_id: i64, order: &Order) -> StoreResult<()> {
    if order.delivery != Delivery::default() {
        upsert_delivery(&mut *conn, order_id, &order.delivery).await?;
    }
    if order.payment != Payment::default() {
        upsert_payment(&mut *conn, order_id, &order.payment).await?;
    }
    insert_items(conn, order_id, &order.items).await
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order> {
        let query = format!("{} WHERE o.order_uid = $1", SELECT_ORDER);
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("get order"))?
            .ok_or(StoreError::NotFound)?;

        let mut items = load_items(&self.pool, vec![row.id]).await?;
        let order_items = items.remove(&row.id).unwrap_or_default();
        Ok(row.into_order(order_items))
    }

    async fn create(&self, order: &Order) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await.map_err(backend("begin transaction"))?;

        let inserted: Option<(i64, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature,
                                customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_uid) DO NOTHING
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_error("insert order"))?;

        // Dropping `tx` rolls back.
        let Some((id, created_at, updated_at)) = inserted else {
            debug!("Order {} already present, insert skipped", order.order_uid);
            return Err(StoreError::Conflict);
        };

        write_children(&mut *tx, id, order).await?;
        tx.commit().await.map_err(backend("commit create"))?;

        let mut stored = order.clone();
        stored.id = id;
        stored.created_at = Some(created_at);
        stored.updated_at = Some(updated_at);
        Ok(stored)
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend("begin transaction"))?;

        let order_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET track_number = $2, entry = $3, locale = $4, internal_signature = $5,
                customer_id = $6, delivery_service = $7, shardkey = $8, sm_id = $9,
                date_created = $10, oof_shard = $11, updated_at = COALESCE($12, NOW())
            WHERE order_uid = $1
            RETURNING id
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .bind(order.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend("update order"))?;

        let order_id = order_id.ok_or(StoreError::NotFound)?;

        sqlx::query("DELETE FROM items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(backend("clear items"))?;

        write_children(&mut *tx, order_id, order).await?;
        tx.commit().await.map_err(backend("commit update"))?;
        Ok(())
    }

    async fn exists_by_id(&self, order_uid: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_uid = $1)")
            .bind(order_uid)
            .fetch_one(&self.pool)
            .await
            .map_err(backend("check order existence"))
    }

    async fn list_recent_for_cache_preload(&self, limit: usize) -> StoreResult<Vec<Order>> {
        let query = format!("{} ORDER BY o.created_at DESC, o.id DESC LIMIT $1", SELECT_ORDER);
        let rows = sqlx::query_as::<_, OrderRow>(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend("list recent orders"))?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut items = load_items(&self.pool, rows.iter().map(|r| r.id).collect()).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect())
    }

    async fn delete(&self, order_uid: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM orders WHERE order_uid = $1")
            .bind(order_uid)
            .execute(&self.pool)
            .await
            .map_err(backend("delete order"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn health(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend("ping"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> OrderRow {
        OrderRow {
            id: 42,
            order_uid: "b563feb7b2b84b6test".to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: None,
            oof_shard: "1".to_string(),
            created_at: None,
            updated_at: None,
            delivery_name: String::new(),
            delivery_phone: String::new(),
            delivery_zip: String::new(),
            delivery_city: String::new(),
            delivery_address: String::new(),
            delivery_region: String::new(),
            delivery_email: String::new(),
            payment_transaction: "b563feb7b2b84b6test".to_string(),
            payment_request_id: String::new(),
            payment_currency: "USD".to_string(),
            payment_provider: "wbpay".to_string(),
            payment_amount: 1817,
            payment_dt: 1637907727,
            payment_bank: "alpha".to_string(),
            payment_delivery_cost: 1500,
            payment_goods_total: 317,
            payment_custom_fee: 0,
        }
    }

    #[test]
    fn test_missing_delivery_row_maps_to_empty_record() {
        let order = row().into_order(Vec::new());
        assert_eq!(order.id, 42);
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment.amount, 1817);
        assert!(order.items.is_empty());
    }

    #[test]
    fn test_item_row_conversion() {
        let item: Item = ItemRow {
            order_id: 42,
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }
        .into();
        assert_eq!(item.chrt_id, 9934930);
        assert_eq!(item.brand, "Vivienne Sabo");
    }
}
