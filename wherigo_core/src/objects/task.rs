use std::str::FromStr;

use super::entity_kind;
use crate::error::Result;
use crate::lua_host::ScriptEnum;

entity_kind!(Task, Task);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    Correct,
    Incorrect,
    NotCorrectOrIncorrect,
}

impl FromStr for TaskState {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "correct" => TaskState::Correct,
            "incorrect" => TaskState::Incorrect,
            "none" | "notcorrectorincorrect" => TaskState::NotCorrectOrIncorrect,
            _ => return Err(()),
        })
    }
}

impl ScriptEnum for TaskState {
    fn script_name(&self) -> &'static str {
        match self {
            TaskState::Correct => "Correct",
            TaskState::Incorrect => "Incorrect",
            TaskState::NotCorrectOrIncorrect => "None",
        }
    }
}

impl Task {
    pub fn complete(&self) -> Result<bool> {
        Ok(self.container().get_bool("Complete")?.unwrap_or(false))
    }

    pub fn correct_state(&self) -> Result<TaskState> {
        Ok(self
            .container()
            .get_enum("CorrectState")?
            .unwrap_or(TaskState::NotCorrectOrIncorrect))
    }

    pub fn sort_order(&self) -> Result<i64> {
        Ok(self.container().get_int("SortOrder")?.unwrap_or_default())
    }
}
