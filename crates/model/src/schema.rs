//! Trait labels used by the hunt document.

pub const CHILDREN: &str = "children";
pub const NAME: &str = "name";
pub const URL: &str = "url";
pub const ANSWER: &str = "answer";
pub const SHEET_ID: &str = "sheetId";
pub const STATUS: &str = "status";
pub const LAST_STATUS_UPDATE: &str = "lastStatusUpdate";
pub const CHANNEL_ID: &str = "channelId";
pub const ROLE_ID: &str = "roleId";
pub const INDEX_CHANNEL_ID: &str = "indexChannelId";

// Hunt-level fields on the root node.
pub const GUILD_ID: &str = "guildId";
pub const PUZZLE_ADD_CHANNEL_ID: &str = "puzzleAddChannelId";
pub const PUZZLE_SOLVE_CHANNEL_ID: &str = "puzzleSolveChannelId";
pub const PUZZLE_STATUS_UPDATE_CHANNEL_ID: &str = "puzzleStatusUpdateChannelId";
