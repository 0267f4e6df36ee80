//! Built-in skills registered in code at startup so the registry has
//! something to dispatch to out of the box.

pub mod memory_search;
pub mod shell;
pub mod skill_writer;
pub mod web_search;

pub use memory_search::MemorySearchSkill;
pub use shell::ShellSkill;
pub use skill_writer::SkillWriterSkill;
pub use web_search::WebSearchSkill;
