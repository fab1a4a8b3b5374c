pub mod index;
pub mod loader;
pub mod select;
pub mod types;

pub use index::SkillIndex;
pub use select::select_skills;
