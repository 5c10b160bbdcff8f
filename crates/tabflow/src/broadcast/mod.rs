//! Status-change notifications for subscribers.

pub mod notification;

pub use notification::{
    publish, BroadcastSink, EventAction, LogSink, Notification, NotificationSink,
};
