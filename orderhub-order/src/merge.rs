//! Field-level merge of an incoming order into an existing snapshot.
//!
//! The incoming side wins only where it carries a value: empty strings,
//! zero numbers and absent timestamps mean "not provided" and keep the
//! existing value. This lets the feed send partial updates without echoing
//! unchanged fields.

use chrono::{DateTime, Utc};
use orderhub_shared::{is_unset_time, Delivery, Item, Order, Payment};

fn take_text(target: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *target = incoming.to_string();
    }
}

fn take_number<T: Copy + Default + PartialEq>(target: &mut T, incoming: T) {
    if incoming != T::default() {
        *target = incoming;
    }
}

fn take_time(target: &mut Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) {
    if let Some(time) = incoming.filter(|t| !is_unset_time(t)) {
        *target = Some(time);
    }
}

/// Merges `incoming` into `existing`, stamping `updated_at` with the current time.
pub fn merge_orders(existing: &Order, incoming: &Order) -> Order {
    merge_orders_at(existing, incoming, Utc::now())
}

/// Same as [`merge_orders`] with an explicit merge time.
pub fn merge_orders_at(existing: &Order, incoming: &Order, now: DateTime<Utc>) -> Order {
    let mut merged = existing.clone();

    take_text(&mut merged.track_number, &incoming.track_number);
    take_text(&mut merged.entry, &incoming.entry);
    take_text(&mut merged.locale, &incoming.locale);
    take_text(&mut merged.internal_signature, &incoming.internal_signature);
    take_text(&mut merged.customer_id, &incoming.customer_id);
    take_text(&mut merged.delivery_service, &incoming.delivery_service);
    take_text(&mut merged.shardkey, &incoming.shardkey);
    take_number(&mut merged.sm_id, incoming.sm_id);
    take_time(&mut merged.date_created, incoming.date_created);
    take_text(&mut merged.oof_shard, &incoming.oof_shard);

    merged.delivery = merge_delivery(&existing.delivery, &incoming.delivery);
    merged.payment = merge_payment(&existing.payment, &incoming.payment);
    merged.items = merge_items(&existing.items, &incoming.items);

    merged.updated_at = Some(now);
    merged
}

pub fn merge_delivery(existing: &Delivery, incoming: &Delivery) -> Delivery {
    let mut merged = existing.clone();
    take_text(&mut merged.name, &incoming.name);
    take_text(&mut merged.phone, &incoming.phone);
    take_text(&mut merged.zip, &incoming.zip);
    take_text(&mut merged.city, &incoming.city);
    take_text(&mut merged.address, &incoming.address);
    take_text(&mut merged.region, &incoming.region);
    take_text(&mut merged.email, &incoming.email);
    merged
}

pub fn merge_payment(existing: &Payment, incoming: &Payment) -> Payment {
    let mut merged = existing.clone();
    take_text(&mut merged.transaction, &incoming.transaction);
    take_text(&mut merged.request_id, &incoming.request_id);
    take_text(&mut merged.currency, &incoming.currency);
    take_text(&mut merged.provider, &incoming.provider);
    take_number(&mut merged.amount, incoming.amount);
    take_number(&mut merged.payment_dt, incoming.payment_dt);
    take_text(&mut merged.bank, &incoming.bank);
    take_number(&mut merged.delivery_cost, incoming.delivery_cost);
    take_number(&mut merged.goods_total, incoming.goods_total);
    take_number(&mut merged.custom_fee, incoming.custom_fee);
    merged
}

pub fn merge_item(existing: &Item, incoming: &Item) -> Item {
    let mut merged = existing.clone();
    take_text(&mut merged.track_number, &incoming.track_number);
    take_number(&mut merged.price, incoming.price);
    take_text(&mut merged.rid, &incoming.rid);
    take_text(&mut merged.name, &incoming.name);
    take_number(&mut merged.sale, incoming.sale);
    take_text(&mut merged.size, &incoming.size);
    take_number(&mut merged.total_price, incoming.total_price);
    take_number(&mut merged.nm_id, incoming.nm_id);
    take_text(&mut merged.brand, &incoming.brand);
    take_number(&mut merged.status, incoming.status);
    merged
}

/// Merges item lists keyed by `chrt_id`.
///
/// Result order: one entry per incoming item (merged with the first unused
/// existing item sharing its `chrt_id`, or appended as new), followed by
/// the existing items nobody matched, in their original order. An empty
/// incoming list leaves the existing items untouched.
pub fn merge_items(existing: &[Item], incoming: &[Item]) -> Vec<Item> {
    if incoming.is_empty() {
        return existing.to_vec();
    }

    let mut used = vec![false; existing.len()];
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for item in incoming {
        let matched = existing
            .iter()
            .enumerate()
            .position(|(idx, candidate)| !used[idx] && candidate.chrt_id == item.chrt_id);

        match matched {
            Some(idx) => {
                used[idx] = true;
                merged.push(merge_item(&existing[idx], item));
            }
            None => merged.push(item.clone()),
        }
    }

    merged.extend(
        existing
            .iter()
            .zip(used)
            .filter(|(_, used)| !used)
            .map(|(item, _)| item.clone()),
    );

    merged
}
