//! Structural checks applied to incoming orders before any merge or
//! persistence decision. The first failing rule wins.

use orderhub_shared::{Delivery, Item, Order, Payment};

use crate::{CoreError, CoreResult};

pub const ORDER_UID_MIN_LEN: usize = 10;
pub const ORDER_UID_MAX_LEN: usize = 255;

pub fn validate_order_uid(uid: &str) -> CoreResult<()> {
    if uid.is_empty() {
        return Err(CoreError::validation("order_uid", "cannot be empty"));
    }

    let len = uid.chars().count();
    if !(ORDER_UID_MIN_LEN..=ORDER_UID_MAX_LEN).contains(&len) {
        return Err(CoreError::validation(
            "order_uid",
            format!(
                "must be between {} and {} characters",
                ORDER_UID_MIN_LEN, ORDER_UID_MAX_LEN
            ),
        ));
    }

    if uid.chars().any(char::is_whitespace) {
        return Err(CoreError::validation("order_uid", "cannot contain spaces"));
    }

    Ok(())
}

/// Full validation of a candidate order.
pub fn validate_order(order: &Order) -> CoreResult<()> {
    validate_order_uid(&order.order_uid)?;

    if order.track_number.is_empty() {
        return Err(CoreError::validation("track_number", "cannot be empty"));
    }

    if order.customer_id.is_empty() {
        return Err(CoreError::validation("customer_id", "cannot be empty"));
    }

    // Sub-records are only checked once they carry their identifying field.
    if !order.delivery.name.is_empty() {
        validate_delivery(&order.delivery)?;
    }

    if !order.payment.transaction.is_empty() {
        validate_payment(&order.payment)?;
    }

    if order.items.is_empty() {
        return Err(CoreError::validation(
            "items",
            "order must contain at least one item",
        ));
    }

    for (index, item) in order.items.iter().enumerate() {
        validate_item(item, index)?;
    }

    Ok(())
}

pub fn validate_delivery(delivery: &Delivery) -> CoreResult<()> {
    if delivery.name.is_empty() {
        return Err(CoreError::validation("delivery.name", "cannot be empty"));
    }
    if delivery.phone.is_empty() {
        return Err(CoreError::validation("delivery.phone", "cannot be empty"));
    }
    if delivery.address.is_empty() {
        return Err(CoreError::validation("delivery.address", "cannot be empty"));
    }
    if !delivery.email.is_empty() && !delivery.email.contains('@') {
        return Err(CoreError::validation("delivery.email", "invalid email format"));
    }
    Ok(())
}

pub fn validate_payment(payment: &Payment) -> CoreResult<()> {
    if payment.transaction.is_empty() {
        return Err(CoreError::validation("payment.transaction", "cannot be empty"));
    }
    if payment.currency.is_empty() {
        return Err(CoreError::validation("payment.currency", "cannot be empty"));
    }
    if payment.provider.is_empty() {
        return Err(CoreError::validation("payment.provider", "cannot be empty"));
    }
    if payment.amount <= 0 {
        return Err(CoreError::validation("payment.amount", "must be greater than 0"));
    }
    Ok(())
}

pub fn validate_item(item: &Item, index: usize) -> CoreResult<()> {
    if item.name.is_empty() {
        return Err(CoreError::validation(format!("items[{}].name", index), "cannot be empty"));
    }
    if item.price <= 0 {
        return Err(CoreError::validation(
            format!("items[{}].price", index),
            "must be greater than 0",
        ));
    }
    if item.brand.is_empty() {
        return Err(CoreError::validation(format!("items[{}].brand", index), "cannot be empty"));
    }
    Ok(())
}
