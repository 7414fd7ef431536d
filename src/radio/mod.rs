mod btleplug_link;
mod fake_link;
pub(crate) mod link;
pub(crate) mod model;

pub use self::btleplug_link::BtleplugLink;
pub use self::fake_link::{FakeRadio, FakeRadioConfig, FakeRadioHandle, RadioCommand, ScanFixture};
pub use self::link::{EventSender, RadioEvent, RadioLink};
pub use self::model::{
    ConnectionState, DeviceId, DeviceListSnapshot, FoundDevice, RadioSnapshot, ServiceDescriptor,
};
