pub mod models;

pub use models::{is_unset_time, Delivery, Item, Order, Payment};
