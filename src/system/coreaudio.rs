use anyhow::{Result, anyhow, bail};
use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use coreaudio_sys::*;
use std::mem;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioDevice, DeviceType};
use crate::system::traits::{AudioSystemInterface, ChangeCallback};

struct ListenerContext {
    on_device_list_changed: ChangeCallback,
    on_default_device_changed: ChangeCallback,
}

/// CoreAudio backed audio system.
///
/// The stable identifier is the device UID, the ephemeral identifier is the
/// decimal `AudioObjectID`. Property listeners are installed by `subscribe`
/// and removed when the value is dropped.
pub struct CoreAudioSystem {
    listeners: Mutex<Option<Box<ListenerContext>>>,
}

impl CoreAudioSystem {
    pub fn new() -> Result<Self> {
        // Deliver property notifications on the HAL's own thread instead of
        // the main run loop, which nothing in this process spins
        let address = global_address(kAudioHardwarePropertyRunLoop);
        let run_loop: *const c_void = ptr::null();
        let status = unsafe {
            AudioObjectSetPropertyData(
                kAudioObjectSystemObject,
                &address,
                0,
                ptr::null(),
                mem::size_of::<*const c_void>() as u32,
                &run_loop as *const _ as *const c_void,
            )
        };
        check(status, "configure the CoreAudio notification thread")?;

        info!("Initialized CoreAudio audio system");
        Ok(Self {
            listeners: Mutex::new(None),
        })
    }

    fn device_ids(&self) -> Result<Vec<AudioObjectID>> {
        let address = global_address(kAudioHardwarePropertyDevices);
        let mut size: u32 = 0;
        let status = unsafe {
            AudioObjectGetPropertyDataSize(
                kAudioObjectSystemObject,
                &address,
                0,
                ptr::null(),
                &mut size,
            )
        };
        check(status, "get the device list size")?;

        let count = size as usize / mem::size_of::<AudioObjectID>();
        let mut ids: Vec<AudioObjectID> = vec![0; count];
        let status = unsafe {
            AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &address,
                0,
                ptr::null(),
                &mut size,
                ids.as_mut_ptr() as *mut c_void,
            )
        };
        check(status, "get the device list")?;

        ids.truncate(size as usize / mem::size_of::<AudioObjectID>());
        Ok(ids)
    }

    fn string_property(
        &self,
        device_id: AudioObjectID,
        selector: AudioObjectPropertySelector,
    ) -> Result<String> {
        let address = global_address(selector);
        let mut size = mem::size_of::<CFStringRef>() as u32;
        let mut value: CFStringRef = ptr::null();
        let status = unsafe {
            AudioObjectGetPropertyData(
                device_id,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut value as *mut _ as *mut c_void,
            )
        };
        check(status, "read a device string property")?;

        if value.is_null() {
            bail!("Device {} returned an empty string property", device_id);
        }
        let value = unsafe { CFString::wrap_under_create_rule(value) };
        Ok(value.to_string())
    }

    fn is_alive(&self, device_id: AudioObjectID) -> bool {
        let address = global_address(kAudioDevicePropertyDeviceIsAlive);
        let mut size = mem::size_of::<u32>() as u32;
        let mut alive: u32 = 0;
        let status = unsafe {
            AudioObjectGetPropertyData(
                device_id,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut alive as *mut _ as *mut c_void,
            )
        };
        status == kAudioHardwareNoError as i32 && alive != 0
    }

    /// Number of channels the device exposes in the given direction
    fn channel_count(&self, device_id: AudioObjectID, device_type: DeviceType) -> u32 {
        let address = AudioObjectPropertyAddress {
            mSelector: kAudioDevicePropertyStreamConfiguration,
            mScope: scope_for(device_type),
            mElement: kAudioObjectPropertyElementMain,
        };

        let mut size: u32 = 0;
        let status = unsafe {
            AudioObjectGetPropertyDataSize(device_id, &address, 0, ptr::null(), &mut size)
        };
        if status != kAudioHardwareNoError as i32 || size == 0 {
            return 0;
        }

        // u64 backing keeps the buffer list suitably aligned
        let mut buffer: Vec<u64> = vec![0; (size as usize).div_ceil(mem::size_of::<u64>())];
        let status = unsafe {
            AudioObjectGetPropertyData(
                device_id,
                &address,
                0,
                ptr::null(),
                &mut size,
                buffer.as_mut_ptr() as *mut c_void,
            )
        };
        if status != kAudioHardwareNoError as i32 {
            return 0;
        }

        unsafe {
            let list = &*(buffer.as_ptr() as *const AudioBufferList);
            let buffers =
                std::slice::from_raw_parts(list.mBuffers.as_ptr(), list.mNumberBuffers as usize);
            buffers.iter().map(|buffer| buffer.mNumberChannels).sum()
        }
    }

    fn remove_listeners(&self, context: &ListenerContext) {
        let client_data = context as *const ListenerContext as *mut c_void;
        for (selector, listener) in listener_table() {
            let address = global_address(selector);
            let status = unsafe {
                AudioObjectRemovePropertyListener(
                    kAudioObjectSystemObject,
                    &address,
                    Some(listener),
                    client_data,
                )
            };
            if status != kAudioHardwareNoError as i32 {
                warn!("Failed to remove CoreAudio listener {}: {}", selector, status);
            }
        }
    }
}

impl AudioSystemInterface for CoreAudioSystem {
    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        let mut devices = Vec::new();

        for device_id in self.device_ids()? {
            if !self.is_alive(device_id) {
                continue;
            }
            let uid = match self.string_property(device_id, kAudioDevicePropertyDeviceUID) {
                Ok(uid) => uid,
                Err(e) => {
                    debug!("Skipping device {} without a UID: {:#}", device_id, e);
                    continue;
                }
            };
            let name = self
                .string_property(device_id, kAudioDevicePropertyDeviceNameCFString)
                .unwrap_or_else(|_| uid.clone());

            for device_type in DeviceType::ALL {
                if self.channel_count(device_id, device_type) > 0 {
                    devices.push(AudioDevice::new(
                        uid.clone(),
                        device_id.to_string(),
                        name.clone(),
                        device_type,
                    ));
                }
            }
        }

        debug!("Enumerated {} CoreAudio devices", devices.len());
        Ok(devices)
    }

    fn default_device(&self, device_type: DeviceType) -> Result<Option<String>> {
        let address = global_address(default_selector(device_type));
        let mut size = mem::size_of::<AudioObjectID>() as u32;
        let mut device_id: AudioObjectID = kAudioObjectUnknown;
        let status = unsafe {
            AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut device_id as *mut _ as *mut c_void,
            )
        };
        check(status, "read the default device")?;

        if device_id == kAudioObjectUnknown {
            return Ok(None);
        }
        Ok(Some(device_id.to_string()))
    }

    fn set_default_device(&self, device_id: &str, device_type: DeviceType) -> Result<()> {
        let object_id: AudioObjectID = device_id
            .parse()
            .map_err(|_| anyhow!("Invalid CoreAudio device id: {}", device_id))?;

        set_default_property(default_selector(device_type), object_id)?;

        if device_type == DeviceType::Output {
            // Alerts follow the main output device
            if let Err(e) =
                set_default_property(kAudioHardwarePropertyDefaultSystemOutputDevice, object_id)
            {
                warn!("Failed to update the system output device: {:#}", e);
            }
        }

        info!(
            "Set default {} device to CoreAudio id {}",
            device_type.as_str(),
            object_id
        );
        Ok(())
    }

    fn subscribe(
        &self,
        on_device_list_changed: ChangeCallback,
        on_default_device_changed: ChangeCallback,
    ) -> Result<()> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| anyhow!("CoreAudio listener state is poisoned"))?;
        if listeners.is_some() {
            bail!("CoreAudio listeners are already registered");
        }

        let context = Box::new(ListenerContext {
            on_device_list_changed,
            on_default_device_changed,
        });
        // The box is stored below, so its address stays valid until drop
        let client_data = &*context as *const ListenerContext as *mut c_void;

        let mut registered = Vec::new();
        for (selector, listener) in listener_table() {
            let address = global_address(selector);
            let status = unsafe {
                AudioObjectAddPropertyListener(
                    kAudioObjectSystemObject,
                    &address,
                    Some(listener),
                    client_data,
                )
            };
            if let Err(e) = check(status, "register a CoreAudio property listener") {
                error!("Failed to register listener {}: {}", selector, status);
                for (selector, listener) in registered {
                    let address = global_address(selector);
                    unsafe {
                        AudioObjectRemovePropertyListener(
                            kAudioObjectSystemObject,
                            &address,
                            Some(listener),
                            client_data,
                        );
                    }
                }
                return Err(e);
            }
            registered.push((selector, listener));
        }

        *listeners = Some(context);
        info!("CoreAudio property listeners registered");
        Ok(())
    }
}

impl Drop for CoreAudioSystem {
    fn drop(&mut self) {
        let context = match self.listeners.get_mut() {
            Ok(listeners) => listeners.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(context) = context {
            self.remove_listeners(&context);
            debug!("CoreAudio property listeners removed");
        }
    }
}

type ListenerProc = unsafe extern "C" fn(
    AudioObjectID,
    UInt32,
    *const AudioObjectPropertyAddress,
    *mut c_void,
) -> OSStatus;

fn listener_table() -> [(AudioObjectPropertySelector, ListenerProc); 3] {
    [
        (kAudioHardwarePropertyDevices, device_list_listener),
        (
            kAudioHardwarePropertyDefaultOutputDevice,
            default_device_listener,
        ),
        (
            kAudioHardwarePropertyDefaultInputDevice,
            default_device_listener,
        ),
    ]
}

fn global_address(selector: AudioObjectPropertySelector) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: kAudioObjectPropertyElementMain,
    }
}

fn scope_for(device_type: DeviceType) -> AudioObjectPropertyScope {
    match device_type {
        DeviceType::Input => kAudioDevicePropertyScopeInput,
        DeviceType::Output => kAudioDevicePropertyScopeOutput,
    }
}

fn default_selector(device_type: DeviceType) -> AudioObjectPropertySelector {
    match device_type {
        DeviceType::Input => kAudioHardwarePropertyDefaultInputDevice,
        DeviceType::Output => kAudioHardwarePropertyDefaultOutputDevice,
    }
}

fn set_default_property(
    selector: AudioObjectPropertySelector,
    device_id: AudioObjectID,
) -> Result<()> {
    let address = global_address(selector);
    let status = unsafe {
        AudioObjectSetPropertyData(
            kAudioObjectSystemObject,
            &address,
            0,
            ptr::null(),
            mem::size_of::<AudioObjectID>() as u32,
            &device_id as *const _ as *const c_void,
        )
    };
    check(status, "set the default device")
}

fn check(status: OSStatus, action: &str) -> Result<()> {
    if status != kAudioHardwareNoError as i32 {
        bail!("Failed to {} (OSStatus {})", action, status);
    }
    Ok(())
}

unsafe extern "C" fn device_list_listener(
    _object_id: AudioObjectID,
    _address_count: UInt32,
    _addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if !client_data.is_null() {
        let context = unsafe { &*(client_data as *const ListenerContext) };
        (context.on_device_list_changed)();
    }
    kAudioHardwareNoError as i32
}

unsafe extern "C" fn default_device_listener(
    _object_id: AudioObjectID,
    _address_count: UInt32,
    _addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if !client_data.is_null() {
        let context = unsafe { &*(client_data as *const ListenerContext) };
        (context.on_default_device_changed)();
    }
    kAudioHardwareNoError as i32
}
