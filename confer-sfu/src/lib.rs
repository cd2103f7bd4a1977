//! Confer SFU media worker
//!
//! In-process stand-in for a media worker. It hosts routers and WebRTC
//! transports under the ids the coordinator assigns, hands out connection
//! parameters (ICE credentials, candidates, DTLS fingerprints) and reports
//! completed handshakes back to the coordinator. No media is forwarded.
//!
//! ## Queues served
//!
//! - `newRouterRequest`
//! - `newWebRtcTransportRequest`
//! - `closeTransportRequest`
//! - `closeRouterRequest` (also closes the router's transports)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confer_sfu::MediaWorker;
//!
//! let worker = MediaWorker::new(broker.clone(), config.sfu.clone());
//! let _handle = worker.start()?;
//! ```

mod error;
mod ports;
mod transport;
mod worker;

pub use error::{Result, SfuError};
pub use ports::PortPool;
pub use transport::{DtlsFingerprint, IceParameters, WorkerTransport};
pub use worker::{MediaWorker, WorkerHandle, WorkerStats};
