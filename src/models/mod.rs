pub mod delivery;
pub mod event;
pub mod subscription;
pub mod topic;

pub use delivery::{Delivery, DeliveryState, Reason};
pub use event::Event;
pub use subscription::{Subscription, SubscriptionSpec};
pub use topic::{Topic, TopicSubscription};
