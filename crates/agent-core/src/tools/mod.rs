//! Built-in tools available to every host.

mod question;
mod skill;
mod todo;

pub use question::{QuestionInfo, QuestionOption, QuestionTool};
pub use skill::{Skill, SkillTool};
pub use todo::{TodoItem, TodoPriority, TodoReadTool, TodoStatus, TodoWriteTool};

use std::sync::Arc;

use crate::session::SessionStore;
use crate::tool::ToolRegistry;

/// Registry pre-loaded with the todo, question and skill tools. Task lists are
/// kept in `store` alongside the session they belong to.
pub fn builtin_registry(store: &Arc<dyn SessionStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(TodoReadTool::new(store.clone()));
    registry.register(TodoWriteTool::new(store.clone()));
    registry.register(QuestionTool);
    registry.register(SkillTool::new());
    registry
}
