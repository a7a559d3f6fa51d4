use serde::{Deserialize, Serialize};

use crate::game::state::PlayerId;

/// Every inbound client operation. `disconnect` and `reconnect` are
/// transport-driven and have no wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    JoinLobby {
        lobby_code: String,
        player: JoinPlayer,
    },
    LeaveLobby {
        lobby_code: String,
        player_id: PlayerId,
    },
    PlayerReady {
        lobby_code: String,
        player_id: PlayerId,
        is_ready: bool,
    },
    StartGame {
        lobby_code: String,
        host_id: PlayerId,
    },
    SubmitAnswer {
        lobby_code: String,
        player_id: PlayerId,
        answer: String,
        #[serde(default)]
        wager_percent: Option<i64>,
    },
    SubmitWager {
        lobby_code: String,
        player_id: PlayerId,
        wager_percent: i64,
    },
    PracticeContinue {
        lobby_code: String,
        player_id: PlayerId,
    },
}

/// The joining player's self-description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPlayer {
    pub id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub character_level: Option<u32>,
}
