pub mod device;
pub mod dispatcher;

pub use device::{
    DefaultDeviceEnumerator, DeviceEnumerator, DeviceMode, EnvDeviceList, NvidiaDeviceProbe,
    StaticDevices, VISIBLE_DEVICES_ENV,
};
pub use dispatcher::Dispatcher;
