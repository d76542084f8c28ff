//! System events and the in-process event bus.

pub mod bus;
pub mod event;
pub mod system_event;

pub use bus::{
    DeliveryFailure, EventBus, EventHandler, HandlerError, PublishReport, SubscriptionId, Topic,
};
pub use event::Event;
pub use system_event::SystemEvent;
