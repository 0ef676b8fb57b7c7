//! HTTP request handlers.

mod colony;
mod health;
mod messages;
mod tasks;
mod workers;

pub use colony::get_colony;
pub use health::{health_check, metrics_handler};
pub use messages::exchange_message;
pub use tasks::{cancel_task, enqueue_task, get_task};
pub use workers::{deregister_worker, list_workers};
