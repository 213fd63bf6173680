mod service;

pub use service::{ControlError, ControlService, FeedReport};
