//! Wire protocol and stored-procedure call contract shared across the
//! gateway's edge (C10) and its warehouse-facing components (C1, C6, C8).

pub mod procedures;
pub mod protocol;

pub use procedures::{Procedure, ProcedureCall, ProcedureResponse};
pub use protocol::{ClientMessage, PanelRequest, ServerMessage, SqlResultMetadata};
