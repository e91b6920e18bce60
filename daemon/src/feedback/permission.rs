//! Microphone permission via AVFoundation

use objc2::runtime::AnyClass;
use objc2::msg_send;
use objc2_foundation::NSString;
use tracing::{debug, warn};

use super::{Authorization, PermissionCheck};

#[link(name = "AVFoundation", kind = "framework")]
extern "C" {}

/// Reads `AVCaptureDevice authorizationStatusForMediaType:` for audio
#[derive(Debug, Default)]
pub struct AvPermission;

impl PermissionCheck for AvPermission {
    fn microphone_granted(&self) -> bool {
        let Some(class) = AnyClass::get(c"AVCaptureDevice") else {
            warn!("AVCaptureDevice unavailable, assuming microphone access");
            return true;
        };
        // AVMediaTypeAudio
        let media_type = NSString::from_str("soun");
        let status: isize =
            unsafe { msg_send![class, authorizationStatusForMediaType: &*media_type] };
        let authorization = Authorization::from_raw(status);
        debug!(?authorization, "microphone authorization status");
        authorization.allows_capture()
    }
}
