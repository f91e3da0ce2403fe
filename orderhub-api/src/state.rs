use std::sync::Arc;
use std::time::Duration;

use orderhub_order::OrderService;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(orders: Arc<OrderService>, request_timeout: Duration) -> Self {
        Self {
            orders,
            request_timeout,
        }
    }
}
