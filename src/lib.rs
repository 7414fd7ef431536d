mod cli;
mod config;
mod error;
mod manager;
mod radio;
mod telemetry;

pub use cli::{Args, Command, LogLevel, ScanArgs, ServicesArgs, run};
pub use config::{FetchOptions, ManagerConfig, RetryPolicy};
pub use error::{CommandError, FixtureError, OperationKind, RadioError};
pub use manager::{BleManager, DeviceStream};
pub use radio::{
    BtleplugLink, ConnectionState, DeviceId, DeviceListSnapshot, EventSender, FakeRadio,
    FakeRadioConfig, FakeRadioHandle, FoundDevice, RadioCommand, RadioEvent, RadioLink,
    RadioSnapshot, ScanFixture, ServiceDescriptor,
};
