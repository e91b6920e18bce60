//! CoreAudio implementation of `AudioBackend`
//!
//! Property listeners run on a CoreAudio-owned thread. They only translate
//! the changed selector into a `SystemNotice` and post it to an unbounded
//! channel; all reads and writes happen on the monitor's task.

use std::collections::HashSet;
use std::ffi::c_void;
use std::mem;
use std::ptr::{self, NonNull};

use objc2::rc::Retained;
use objc2_core_audio::{
    kAudioDevicePropertyDeviceUID, kAudioDevicePropertyMute, kAudioDevicePropertyStreams,
    kAudioHardwarePropertyDefaultInputDevice, kAudioHardwarePropertyDevices,
    kAudioObjectPropertyElementMain, kAudioObjectPropertyName, kAudioObjectPropertyScopeGlobal,
    kAudioObjectPropertyScopeInput, kAudioObjectSystemObject, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
};
use objc2_foundation::NSString;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::backend::{AudioBackend, AudioResult, SystemNotice};
use super::device::{AudioError, DeviceId};

const SYSTEM_OBJECT: AudioObjectID = kAudioObjectSystemObject as AudioObjectID;

type NoticeSender = mpsc::UnboundedSender<SystemNotice>;

pub struct CoreAudioBackend {
    /// Boxed so the address handed to CoreAudio as client data is stable
    notices: Box<NoticeSender>,
    watched: HashSet<DeviceId>,
}

impl CoreAudioBackend {
    /// Register the system-wide device list and default input listeners
    pub fn new(notices: NoticeSender) -> AudioResult<Self> {
        let backend = Self {
            notices: Box::new(notices),
            watched: HashSet::new(),
        };
        for &(selector, property) in SYSTEM_SELECTORS {
            backend.add_listener(SYSTEM_OBJECT, global(selector), property)?;
        }
        debug!("coreaudio system listeners registered");
        Ok(backend)
    }

    fn client_data(&self) -> *mut c_void {
        &*self.notices as *const NoticeSender as *mut c_void
    }

    fn add_listener(
        &self,
        object: AudioObjectID,
        mut address: AudioObjectPropertyAddress,
        property: &'static str,
    ) -> AudioResult<()> {
        let status = unsafe {
            AudioObjectAddPropertyListener(
                object,
                NonNull::from(&mut address),
                Some(property_listener),
                self.client_data(),
            )
        };
        check(status, object, property)
    }

    fn remove_listener(
        &self,
        object: AudioObjectID,
        mut address: AudioObjectPropertyAddress,
        property: &'static str,
    ) -> AudioResult<()> {
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                object,
                NonNull::from(&mut address),
                Some(property_listener),
                self.client_data(),
            )
        };
        check(status, object, property)
    }
}

impl Drop for CoreAudioBackend {
    fn drop(&mut self) {
        for id in mem::take(&mut self.watched) {
            let _ = self.remove_listener(id.0, mute_address(), "mute");
        }
        for &(selector, property) in SYSTEM_SELECTORS {
            let _ = self.remove_listener(SYSTEM_OBJECT, global(selector), property);
        }
    }
}

impl AudioBackend for CoreAudioBackend {
    fn device_ids(&self) -> AudioResult<Vec<DeviceId>> {
        let mut address = global(kAudioHardwarePropertyDevices);
        let size = data_size(SYSTEM_OBJECT, &mut address, "devices")?;
        let count = size as usize / mem::size_of::<AudioObjectID>();
        let mut ids: Vec<AudioObjectID> = vec![0; count];
        if count > 0 {
            let mut size = size;
            let status = unsafe {
                AudioObjectGetPropertyData(
                    SYSTEM_OBJECT,
                    NonNull::from(&mut address),
                    0,
                    ptr::null(),
                    NonNull::from(&mut size),
                    NonNull::new_unchecked(ids.as_mut_ptr().cast()),
                )
            };
            check(status, SYSTEM_OBJECT, "devices")?;
            ids.truncate(size as usize / mem::size_of::<AudioObjectID>());
        }
        Ok(ids.into_iter().map(DeviceId).collect())
    }

    fn has_input_streams(&self, id: DeviceId) -> AudioResult<bool> {
        let mut address = AudioObjectPropertyAddress {
            mSelector: kAudioDevicePropertyStreams,
            mScope: kAudioObjectPropertyScopeInput,
            mElement: kAudioObjectPropertyElementMain,
        };
        Ok(data_size(id.0, &mut address, "streams")? > 0)
    }

    fn device_name(&self, id: DeviceId) -> AudioResult<String> {
        read_string(id.0, kAudioObjectPropertyName, "name")
    }

    fn device_uid(&self, id: DeviceId) -> AudioResult<String> {
        read_string(id.0, kAudioDevicePropertyDeviceUID, "uid")
    }

    fn default_input_device(&self) -> AudioResult<Option<DeviceId>> {
        let id: AudioObjectID = read_value(
            SYSTEM_OBJECT,
            global(kAudioHardwarePropertyDefaultInputDevice),
            "default input",
        )?;
        // kAudioObjectUnknown
        Ok((id != 0).then_some(DeviceId(id)))
    }

    fn set_default_input_device(&self, id: DeviceId) -> AudioResult<()> {
        write_value(
            SYSTEM_OBJECT,
            global(kAudioHardwarePropertyDefaultInputDevice),
            id.0,
            "default input",
        )
    }

    fn mute(&self, id: DeviceId) -> AudioResult<bool> {
        let value: u32 = read_value(id.0, mute_address(), "mute")?;
        Ok(value != 0)
    }

    fn set_mute(&self, id: DeviceId, muted: bool) -> AudioResult<()> {
        write_value(id.0, mute_address(), u32::from(muted), "mute")
    }

    fn watch_mute(&mut self, id: DeviceId) -> AudioResult<()> {
        if self.watched.contains(&id) {
            return Ok(());
        }
        self.add_listener(id.0, mute_address(), "mute")?;
        self.watched.insert(id);
        Ok(())
    }

    fn unwatch_mute(&mut self, id: DeviceId) -> AudioResult<()> {
        if !self.watched.remove(&id) {
            return Ok(());
        }
        self.remove_listener(id.0, mute_address(), "mute")
    }
}

const SYSTEM_SELECTORS: &[(u32, &str)] = &[
    (kAudioHardwarePropertyDevices, "devices"),
    (kAudioHardwarePropertyDefaultInputDevice, "default input"),
];

unsafe extern "C-unwind" fn property_listener(
    object: AudioObjectID,
    count: u32,
    addresses: NonNull<AudioObjectPropertyAddress>,
    client_data: *mut c_void,
) -> i32 {
    let Some(notices) = (client_data as *const NoticeSender).as_ref() else {
        return 0;
    };
    let addresses = std::slice::from_raw_parts(addresses.as_ptr(), count as usize);

    for address in addresses {
        let notice = if address.mSelector == kAudioHardwarePropertyDevices {
            SystemNotice::DevicesChanged
        } else if address.mSelector == kAudioHardwarePropertyDefaultInputDevice {
            SystemNotice::DefaultInputChanged
        } else if address.mSelector == kAudioDevicePropertyMute {
            SystemNotice::MuteChanged(DeviceId(object))
        } else {
            continue;
        };
        if notices.send(notice).is_err() {
            warn!("audio notice dropped, monitor is gone");
        }
    }
    0
}

fn global(selector: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: kAudioObjectPropertyElementMain,
    }
}

fn mute_address() -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: kAudioDevicePropertyMute,
        mScope: kAudioObjectPropertyScopeInput,
        mElement: kAudioObjectPropertyElementMain,
    }
}

fn check(status: i32, object: AudioObjectID, property: &'static str) -> AudioResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(AudioError::Os {
            object,
            property,
            status,
        })
    }
}

fn data_size(
    object: AudioObjectID,
    address: &mut AudioObjectPropertyAddress,
    property: &'static str,
) -> AudioResult<u32> {
    let mut size = 0u32;
    let status = unsafe {
        AudioObjectGetPropertyDataSize(
            object,
            NonNull::from(address),
            0,
            ptr::null(),
            NonNull::from(&mut size),
        )
    };
    check(status, object, property)?;
    Ok(size)
}

/// Read a fixed-size scalar property
fn read_value<T: Copy + Default>(
    object: AudioObjectID,
    mut address: AudioObjectPropertyAddress,
    property: &'static str,
) -> AudioResult<T> {
    let mut value = T::default();
    let mut size = mem::size_of::<T>() as u32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            NonNull::from(&mut address),
            0,
            ptr::null(),
            NonNull::from(&mut size),
            NonNull::from(&mut value).cast(),
        )
    };
    check(status, object, property)?;
    Ok(value)
}

fn write_value<T: Copy>(
    object: AudioObjectID,
    mut address: AudioObjectPropertyAddress,
    mut value: T,
    property: &'static str,
) -> AudioResult<()> {
    let status = unsafe {
        AudioObjectSetPropertyData(
            object,
            NonNull::from(&mut address),
            0,
            ptr::null(),
            mem::size_of::<T>() as u32,
            NonNull::from(&mut value).cast(),
        )
    };
    check(status, object, property)
}

/// Read a CFString property; the returned reference is owned by the caller
fn read_string(
    object: AudioObjectID,
    selector: u32,
    property: &'static str,
) -> AudioResult<String> {
    let mut address = global(selector);
    let mut raw: *mut NSString = ptr::null_mut();
    let mut size = mem::size_of::<*mut NSString>() as u32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            NonNull::from(&mut address),
            0,
            ptr::null(),
            NonNull::from(&mut size),
            NonNull::from(&mut raw).cast(),
        )
    };
    check(status, object, property)?;

    // CFString is toll-free bridged to NSString
    let string = unsafe { Retained::from_raw(raw) }.ok_or(AudioError::Missing {
        object,
        property,
    })?;
    Ok(string.to_string())
}
