//! Messages that move a connection to another phase.
//!
//! Every transition is driven by a client-sent message and takes effect for
//! both directions once that message has been dispatched.

use mc_tap_proto::catalog::names::{
    CONFIGURATION_ACKNOWLEDGED, FINISH_CONFIGURATION, INTENTION, LOGIN_ACKNOWLEDGED,
};
use mc_tap_proto::{Direction, MessageType, Phase};
use mc_tap_structure::{Structure, Value};

/// Handshake intent values.
const INTENT_STATUS: i32 = 1;
const INTENT_LOGIN: i32 = 2;
const INTENT_TRANSFER: i32 = 3;

/// Whether messages of this type can change the phase. The interceptor
/// decodes these even when no listener is interested.
pub fn is_significant(ty: &MessageType) -> bool {
    if ty.direction() != Direction::ToServer || ty.is_unknown() {
        return false;
    }
    matches!(
        (ty.phase(), ty.name()),
        (Phase::Handshaking, INTENTION)
            | (Phase::Login, LOGIN_ACKNOWLEDGED)
            | (Phase::Configuration, FINISH_CONFIGURATION)
            | (Phase::Play, CONFIGURATION_ACKNOWLEDGED)
    )
}

/// The phase a connection enters after `ty` went through, if any.
pub fn next_phase(ty: &MessageType, payload: &Structure) -> Option<Phase> {
    if !is_significant(ty) {
        return None;
    }
    match ty.phase() {
        Phase::Handshaking => match payload.get("intention") {
            Some(Value::Int(INTENT_STATUS)) => Some(Phase::Status),
            Some(Value::Int(INTENT_LOGIN | INTENT_TRANSFER)) => Some(Phase::Login),
            _ => None,
        },
        Phase::Login => Some(Phase::Configuration),
        Phase::Configuration => Some(Phase::Play),
        Phase::Play => Some(Phase::Configuration),
        Phase::Status => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_tap_proto::catalog::builtin_registry;
    use mc_tap_proto::catalog::names::{CHAT, KEEP_ALIVE};
    use mc_tap_structure::catalog::builtin_shape;

    fn intention(intent: i32) -> (MessageType, Structure) {
        let ty = MessageType::new(Phase::Handshaking, Direction::ToServer, INTENTION);
        let mut s = Structure::new(builtin_shape(&ty).unwrap());
        s.integers().write(2, intent).unwrap();
        (ty, s)
    }

    #[test]
    fn handshake_intent_selects_phase() {
        let (ty, s) = intention(1);
        assert_eq!(next_phase(&ty, &s), Some(Phase::Status));
        let (ty, s) = intention(2);
        assert_eq!(next_phase(&ty, &s), Some(Phase::Login));
        let (ty, s) = intention(3);
        assert_eq!(next_phase(&ty, &s), Some(Phase::Login));
        let (ty, s) = intention(7);
        assert_eq!(next_phase(&ty, &s), None);
    }

    #[test]
    fn login_configuration_play_cycle() {
        let reg = builtin_registry().unwrap();
        let empty = Structure::new(mc_tap_structure::Shape::empty());
        let step = |phase, name| {
            let ty = reg.lookup(phase, Direction::ToServer, name).unwrap();
            next_phase(ty, &empty)
        };
        assert_eq!(step(Phase::Login, LOGIN_ACKNOWLEDGED), Some(Phase::Configuration));
        assert_eq!(step(Phase::Configuration, FINISH_CONFIGURATION), Some(Phase::Play));
        assert_eq!(step(Phase::Play, CONFIGURATION_ACKNOWLEDGED), Some(Phase::Configuration));
        assert_eq!(step(Phase::Play, CHAT), None);
        assert_eq!(step(Phase::Play, KEEP_ALIVE), None);
    }

    #[test]
    fn server_sent_messages_never_transition() {
        let ty = MessageType::new(Phase::Configuration, Direction::ToClient, FINISH_CONFIGURATION);
        assert!(!is_significant(&ty));
        let unknown = MessageType::unknown(Phase::Handshaking, Direction::ToServer, 0x00);
        assert!(!is_significant(&unknown));
    }
}
