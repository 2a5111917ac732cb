// Data models for the players and storage services

pub mod player;

pub use player::{
    BattingStats, BattingStyle, BowlingStats, BowlingStyle, CreatePlayer, FormatStats,
    ImageUploadUrlRequest, MatchFormat, Player, PlayerRole, PresignDownloadRequest,
    PresignedDownload, PresignedUpload, StatsUpdate,
};
