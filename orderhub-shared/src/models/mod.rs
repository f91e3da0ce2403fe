pub mod order;

pub use order::{is_unset_time, Delivery, Item, Order, Payment};
