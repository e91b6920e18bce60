//! System notifications for one-shot notices

use std::process::Command;

use notify_rust::Notification;
use tracing::{error, info, warn};

use crate::config::APP_NAME;
use crate::events::Notice;

/// Microphone pane of the privacy settings
pub const PRIVACY_MICROPHONE_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone";

/// Send a system notification with a summary and body.
pub fn notify(summary: &str, body: &str) {
    Notification::new()
        .appname(APP_NAME)
        .summary(summary)
        .body(body)
        .show()
        .map_err(|e| error!("failed to send notification: {}", e))
        .ok();
}

/// Show a notice and run its follow-up action, if any. Blocking.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn present(notice: Notice) {
    info!(?notice, "presenting notice");
    notify(notice.title(), notice.body());

    if notice == Notice::PermissionDenied {
        open_url(PRIVACY_MICROPHONE_URL);
    }
}

fn open_url(url: &str) {
    match Command::new("open").arg(url).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%url, ?status, "open exited with failure"),
        Err(e) => warn!(%url, ?e, "failed to run open"),
    }
}
