//! # iec60870
//!
//! The application, session and presentation layers of the IEC 60870-5
//! telecontrol protocols, covering the TCP companion standard 104 and the
//! shared application layer of the serial companion standard 101.
//!
//! ## Features
//!
//! - ASDU codec with parametric address widths and the full compatible
//!   type catalogue
//! - Monitor direction dispatch to typed callbacks
//! - Typed command construction with select-before-execute support
//! - Controlling-side command correlation with activation and termination
//!   timeouts
//! - Controlled-side command delegation with the select interlock
//! - Asynchronous 104 session engine on Tokio: sliding windows, the
//!   t1/t2/t3 timers and the STARTDT/STOPDT/TESTFR lifecycle
//!
//! ## Example
//!
//! ```rust,no_run
//! use iec60870::caller::{Caller, CallerConfig};
//! use iec60870::command::{CommandBuilder, InterrogationGroup};
//! use iec60870::common::SystemParams;
//! use iec60870::iec104::{Iec104Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Iec104Config::default();
//!     cfg.host = "192.168.1.100".to_string();
//!
//!     let params = cfg.params;
//!     let mut session = Session::connect(cfg).await?;
//!     session.bring_up().await?;
//!
//!     // Interrogate the station and print what comes back.
//!     let caller = Caller::new(params, session.class2(), CallerConfig::default());
//!     let request = CommandBuilder::new(params, 1, 0)?
//!         .interrogation(InterrogationGroup::Global)?;
//!     caller.call(request).await?;
//!
//!     while let Some(payload) = session.recv().await {
//!         let asdu = iec60870::asdu::Asdu::decode(&payload, &params)?;
//!         println!("{}", asdu.display(&params));
//!     }
//!     Ok(())
//! }
//! ```

pub mod asdu;
pub mod caller;
pub mod command;
pub mod common;
pub mod delegate;
pub mod error;
pub mod iec104;
pub mod information;
pub mod monitor;
pub mod time;

// Re-export the types most applications touch.
pub use crate::asdu::{Asdu, AsduBuilder, TypeId};
pub use crate::common::{
    Cause, CauseOfTransmission, CommonAddrSize, CotSize, InfoObjAddrSize, Quality, SystemParams,
};
pub use crate::error::{IecError, IecResult};
pub use crate::iec104::{Iec104Config, Session};
pub use crate::monitor::MonitorHandler;
