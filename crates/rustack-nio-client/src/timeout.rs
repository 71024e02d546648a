//! Per-exchange read and write timeout watchdogs.

use std::time::Duration;

use rustack_nio_core::NioError;

use crate::channel::{Channel, handlers};

/// Fail the bound exchange if the request is not written within `timeout`.
///
/// Removed from the pipeline once the request body is fully written.
pub fn install_write_timeout(channel: &Channel, timeout: Duration) {
    let weak = channel.downgrade();
    let task = channel.event_loop().spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(channel) = weak.upgrade() {
            channel.fire_exception_caught(NioError::WriteTimeout { timeout });
        }
    });
    channel
        .pipeline()
        .add_last(handlers::WRITE_TIMEOUT, Some(task.abort_handle()));
}

/// Fail the bound exchange if no response data is read for `timeout`.
///
/// Every read recorded with `touch_read` restarts the countdown.
pub fn install_read_timeout(channel: &Channel, timeout: Duration) {
    channel.attributes().touch_read();
    let weak = channel.downgrade();
    let task = channel.event_loop().spawn(async move {
        loop {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            let quiet = channel.attributes().diagnostics().since_last_read();
            if quiet >= timeout {
                channel.fire_exception_caught(NioError::ReadTimeout { timeout });
                return;
            }
            drop(channel);
            tokio::time::sleep(timeout - quiet).await;
        }
    });
    channel
        .pipeline()
        .add_last(handlers::READ_TIMEOUT, Some(task.abort_handle()));
}
