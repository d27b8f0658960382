//! UPnP control point runtime.
//!
//! Built on the [`noxupnp`] core: SSDP discovery feeds a UDN-keyed cache,
//! device descriptions are fetched through a pluggable provider, actions
//! are invoked through per-proxy FIFO workers, and GENA events arrive on a
//! local NOTIFY listener with sequence-integrity checking.
//!
//! The [`ControlPoint`] composer wires everything together:
//!
//! ```no_run
//! use noxcontrol::{ControlPoint, ControlPointConfiguration};
//!
//! let cp = ControlPoint::spawn(ControlPointConfiguration::default()).unwrap();
//! for device in cp.devices() {
//!     println!("{} at {:?}", device.udn, device.locations);
//! }
//! ```

mod control_point;
mod errors;
mod event_sink;
mod invoker;
mod model;
mod registry;

pub mod discovery;

pub use control_point::{ControlPoint, ControlPointConfiguration};
pub use errors::ControlError;
pub use event_sink::{EventBus, EventSink};
pub use invoker::{ActionProxy, ActionResponse, InvocationState};
pub use model::{DeviceDescription, DeviceId, DiscoveredDevice, ServiceEndpoints, StateVarUpdate};
pub use registry::{AliveOutcome, DiscoveryCache};
