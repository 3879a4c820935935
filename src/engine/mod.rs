//! Protocol engine (C5): client and server drivers built on top of
//! transport/framing/message/pacer.

pub mod client;
pub mod server;

use crate::error::{EngineError, Result};
use crate::message::State;

/// Map a state byte read while waiting for `expected` onto the
/// unexpected-state table from spec §4.5/§7.
pub(crate) fn check_expected_state(expected: State, got: State) -> Result<()> {
    if got == expected {
        return Ok(());
    }
    Err(match got {
        State::AccessDenied => EngineError::access_denied(),
        State::ServerError => EngineError::server_error(),
        State::ServerTerminate => EngineError::server_terminated(),
        other => EngineError::unexpected_state(other),
    })
}
