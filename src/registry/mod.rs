mod service;

pub use service::{DeviceRegistry, RegistryError};
