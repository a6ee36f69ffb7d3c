pub mod error;
pub mod prompt;
pub mod protocol;
pub mod ready;
pub mod results;
pub mod room;
pub mod rules;
pub mod session;
pub mod xp;

pub use error::RaceError;
pub use prompt::PromptPool;
pub use protocol::{ClientMessage, PlayerId, RacePhase, ServerMessage};
pub use room::RaceRoom;
pub use rules::{DnfXpPolicy, RaceRules};
pub use xp::calculate_xp;
