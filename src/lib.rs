//! Pure Storage FlashArray storage plugin core
//!
//! Lets a virtualization host manage VM and container block devices on an
//! external all-flash array: volume, snapshot, and clone operations go to
//! the array's REST API while the resulting block devices are brought up
//! locally via iSCSI or Fibre Channel and device-mapper multipath.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │   activate / alloc / free / snapshot / rollback / clone / path   │
//! ├──────────────┬──────────────┬───────────────┬────────────────────┤
//! │    Naming    │ Array Client │  SAN Fabric   │  Device Resolver   │
//! │  (pure name  │ (REST v1/v2, │ (iscsiadm, FC │  (WWID -> device,  │
//! │    codec)    │   sessions)  │ sysfs, mpath) │   in-use, teardown)│
//! ├──────────────┴──────────────┴───────────────┴────────────────────┤
//! │        FlashArray REST API        │     Linux SAN stack          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The array client is the only component that speaks HTTP; the SAN
//! fabric driver and the device resolver are the only ones that touch the
//! kernel. The orchestrator owns ordering: create -> connect -> device
//! appears, and teardown -> disconnect -> destroy, never the reverse.
//!
//! # Modules
//!
//! - [`naming`]: bidirectional host-name / array-name codec
//! - [`array`]: REST transport, dialect abstraction, typed records
//! - [`san`]: iSCSI/FC drivers, multipath, subprocess gateway
//! - [`device`]: WWID resolution, wait loops, safe teardown
//! - [`orchestrator`]: compound operations over all of the above
//! - [`config`]: storage definition options
//! - [`error`]: error taxonomy and disposition

pub mod array;
pub mod config;
pub mod device;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod san;

// Re-export commonly used types
pub use array::{
    ArrayClient, ArrayClientConfig, ArrayInfo, ArrayPort, ArraySnapshot, ArraySpace,
    ArrayVolume, ConnectionRecord, HostRecord, PodInfo,
};
pub use config::{HostMode, SanProtocolKind, StorageConfig};
pub use device::DeviceResolver;
pub use error::{Disposition, Error, Result};
pub use naming::{ParsedVolname, ParentRef};
pub use orchestrator::volume_ops::ImageInfo;
pub use orchestrator::{Orchestrator, StorageStatus};
pub use san::{CommandRunner, Multipath, SanFabric};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
