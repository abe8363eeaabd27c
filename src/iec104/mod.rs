//! IEC 60870-5-104: the TCP companion standard. APDU framing, session
//! configuration and the windowed session engine.

pub mod apdu;
pub mod config;
pub mod session;

pub use apdu::{Apci, Apdu, UFunction};
pub use config::{Iec104Config, PORT, PORT_SECURE};
pub use session::{Level, Outbound, Session, SessionStats};
