// ============================
// livecollab-backend-lib/src/validation.rs
// ============================
//! Inbound message validation, applied after JSON decoding and before
//! dispatch to the registry.

use livecollab_common::ClientToServer;

use crate::error::AppError;

/// Reject messages with blank identifiers before they reach the registry.
pub fn validate_client_message(msg: &ClientToServer) -> Result<(), AppError> {
    match msg {
        ClientToServer::JoinRoom { room_id, .. } => require(room_id, "roomId"),
        ClientToServer::RequestPayload { room_id } => require(room_id, "roomId"),
        ClientToServer::UpdateSymbol { room_id, symbol } => {
            require(room_id, "roomId")?;
            require(symbol, "symbol")
        },
        // A blank name is meaningful here: it resets a guest to its label.
        ClientToServer::SetDisplayName { room_id, .. } => require(room_id, "roomId"),
    }
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecollab_common::RoomKind;

    #[test]
    fn blank_room_id_is_rejected() {
        let msg = ClientToServer::JoinRoom {
            kind: RoomKind::Stock,
            room_id: "   ".to_string(),
        };
        assert!(matches!(
            validate_client_message(&msg),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn blank_symbol_is_rejected() {
        let msg = ClientToServer::UpdateSymbol {
            room_id: "r1".to_string(),
            symbol: "".to_string(),
        };
        assert!(validate_client_message(&msg).is_err());
    }

    #[test]
    fn blank_display_name_is_allowed() {
        let msg = ClientToServer::SetDisplayName {
            kind: RoomKind::Football,
            room_id: "r1".to_string(),
            name: "  ".to_string(),
        };
        assert!(validate_client_message(&msg).is_ok());
    }

    #[test]
    fn well_formed_messages_pass() {
        let msg = ClientToServer::RequestPayload {
            room_id: "prem".to_string(),
        };
        assert!(validate_client_message(&msg).is_ok());
    }
}
