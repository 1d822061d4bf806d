pub mod coupons;
pub mod gateway;
pub mod metrics;
pub mod payments;
pub mod repository;
pub mod subscriptions;

pub use coupons::{CouponError, CouponEvaluator, CouponQuote};
pub use gateway::{PaymentGateway, SindipayClient};
pub use metrics::{get_metrics, init_metrics};
pub use payments::{PaymentError, PaymentLifecycle};
pub use repository::{MemoryStore, MongoStore, Repositories, StoreError};
pub use subscriptions::{SubscriptionActivator, SubscriptionError};
