pub mod ai;
pub mod keyword;

pub use ai::{AiGate, RelevanceJudge};
pub use keyword::KeywordFilter;
