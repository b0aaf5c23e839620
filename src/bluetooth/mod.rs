pub mod frame;
#[cfg(feature = "bluetooth")]
pub mod notifier;
