pub mod subscriptions;
pub mod topics;

pub use subscriptions::SubscriptionRegistry;
pub use topics::TopicRegistry;
