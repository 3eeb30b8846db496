use std::str::FromStr;

use super::entity_kind;
use crate::error::Result;

entity_kind!(
    /// A question the cartridge asks the player through `Wherigo.GetInput`.
    Input,
    Input
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputKind {
    Text,
    MultipleChoice,
}

impl FromStr for InputKind {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "Text" => Ok(InputKind::Text),
            "MultipleChoice" => Ok(InputKind::MultipleChoice),
            _ => Err(()),
        }
    }
}

impl Input {
    pub fn kind(&self) -> Result<InputKind> {
        Ok(self
            .container()
            .get_enum("InputType")?
            .unwrap_or(InputKind::Text))
    }

    pub fn text(&self) -> Result<String> {
        Ok(self.container().get_string("Text")?.unwrap_or_default())
    }

    pub fn choices(&self) -> Result<Vec<String>> {
        self.container().get_list("Choices")
    }
}
