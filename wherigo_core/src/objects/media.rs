use std::str::FromStr;

use super::entity_kind;
use crate::data::Container;
use crate::error::Result;

entity_kind!(Media, Media);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Bmp,
    Png,
    Jpg,
    Gif,
    Wav,
    Mp3,
    Fdl,
    Ogg,
    Unknown,
}

impl FromStr for MediaKind {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "bmp" => MediaKind::Bmp,
            "png" => MediaKind::Png,
            "jpg" | "jpeg" => MediaKind::Jpg,
            "gif" => MediaKind::Gif,
            "wav" => MediaKind::Wav,
            "mp3" => MediaKind::Mp3,
            "fdl" => MediaKind::Fdl,
            "ogg" => MediaKind::Ogg,
            _ => MediaKind::Unknown,
        })
    }
}

impl MediaKind {
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            MediaKind::Wav | MediaKind::Mp3 | MediaKind::Fdl | MediaKind::Ogg
        )
    }
}

/// One entry of a `ZMedia.Resources` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaResource {
    pub kind: MediaKind,
    pub filename: String,
}

impl Media {
    pub fn alt_text(&self) -> Result<String> {
        Ok(self.container().get_string("AltText")?.unwrap_or_default())
    }

    pub fn resources(&self) -> Result<Vec<MediaResource>> {
        let mut resources = Vec::new();
        for entry in self.container().get_list::<Container>("Resources")? {
            let kind = entry
                .get_enum("Type")?
                .unwrap_or(MediaKind::Unknown);
            let filename = entry.get_string("Filename")?.unwrap_or_default();
            resources.push(MediaResource { kind, filename });
        }
        Ok(resources)
    }

    pub fn kind(&self) -> Result<MediaKind> {
        Ok(self
            .resources()?
            .first()
            .map(|resource| resource.kind)
            .unwrap_or(MediaKind::Unknown))
    }
}
