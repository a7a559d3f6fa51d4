use thiserror::Error;

/// Errors reported to the caller of an engine operation.
///
/// These are user errors or protocol violations; they are returned to the
/// originating connection only and never broadcast to the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Only the lobby host may start a session.
    #[error("only the lobby host may start the game")]
    NotHost,

    /// An engine already exists for this lobby code.
    #[error("a game is already running in this lobby")]
    AlreadyActive,

    /// No active session exists for this lobby.
    #[error("no game is running in this lobby")]
    NotActive,

    /// There is no current question to act on.
    #[error("no question is currently active")]
    NoQuestion,

    /// The player is not part of this session's roster.
    #[error("player is not part of this game")]
    UnknownPlayer,

    /// The player already submitted an answer this round.
    #[error("player has already answered this question")]
    AlreadyAnswered,

    /// A contending submission by the same player is in flight.
    #[error("a submission by this player is already in progress")]
    InProgress,

    /// In duel mode, only the two active duelists may answer.
    #[error("only the active duelists may answer")]
    NotDuelist,

    /// In survival mode, eliminated players may not answer.
    #[error("eliminated players cannot answer")]
    Eliminated,

    /// The wager does not apply to this session.
    #[error("invalid wager for this game")]
    InvalidWager,

    /// A wager was submitted outside an active wager phase.
    #[error("no wager phase is active")]
    NoWagerPhase,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// The wire code for this error, as listed in the protocol taxonomy.
    pub fn code(&self) -> &'static str {
        use GameError::*;
        match self {
            NotHost => "NOT_HOST",
            AlreadyActive => "ALREADY_ACTIVE",
            NotActive => "NOT_ACTIVE",
            NoQuestion => "NO_QUESTION",
            UnknownPlayer => "UNKNOWN_PLAYER",
            AlreadyAnswered => "ALREADY_ANSWERED",
            InProgress => "IN_PROGRESS",
            NotDuelist => "NOT_DUELIST",
            Eliminated => "ELIMINATED",
            InvalidWager => "INVALID_WAGER",
            NoWagerPhase => "NO_WAGER_PHASE",
            Internal(_) => "INTERNAL",
        }
    }
}
