//! Idle and age based connection reaping.
//!
//! Both reapers run on the channel's own event loop and are registered in
//! its pipeline, so closing the channel stops them.
//!
//! The idle reaper measures idleness from the last time the channel was
//! returned (or from creation, for a channel never used). Protocol-level
//! pings are not application activity and never keep a channel alive.

use std::time::Duration;

use tracing::debug;

use crate::channel::{Channel, handlers};

/// Close `channel` once it has been idle, and not in use, for `max_idle`.
pub fn install_idle_reaper(channel: &Channel, max_idle: Duration) {
    let weak = channel.downgrade();
    let task = channel.event_loop().spawn(async move {
        loop {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            let wait = match channel.attributes().diagnostics().idle_for() {
                _ if channel.attributes().in_use() => max_idle,
                Some(idle) if idle >= max_idle => {
                    debug!(
                        channel = %channel,
                        ?max_idle,
                        "closing channel idle longer than the configured max idle time"
                    );
                    channel.close();
                    return;
                }
                Some(idle) => max_idle - idle,
                None => max_idle,
            };
            drop(channel);
            tokio::time::sleep(wait).await;
        }
    });
    channel
        .pipeline()
        .add_last(handlers::IDLE_REAPER, Some(task.abort_handle()));
}

/// Retire `channel` once it is older than `time_to_live`.
///
/// A channel in use is flagged to close on release so its exchange can
/// finish; an idle one is closed immediately.
pub fn install_age_reaper(channel: &Channel, time_to_live: Duration) {
    let weak = channel.downgrade();
    let remaining = time_to_live.saturating_sub(channel.attributes().diagnostics().age());
    let task = channel.event_loop().spawn(async move {
        tokio::time::sleep(remaining).await;
        let Some(channel) = weak.upgrade() else {
            return;
        };
        if channel.attributes().in_use() {
            debug!(channel = %channel, "channel exceeded its time to live, closing on release");
            channel.attributes().set_close_on_release();
        } else {
            debug!(channel = %channel, "channel exceeded its time to live, closing");
            channel.close();
        }
    });
    channel
        .pipeline()
        .add_last(handlers::AGE_REAPER, Some(task.abort_handle()));
}
