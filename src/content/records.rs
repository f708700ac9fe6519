use serde::{Deserialize, Serialize};

use super::{Collection, ContentSnapshot, Entry, Record};
use crate::error::ContentError;

/// Script assumed when a character does not name one
pub const DEFAULT_SCRIPT: &str = "chakma";

/// Dictionary word
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    #[serde(default)]
    pub term: String,

    #[serde(default)]
    pub language: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl Word {
    pub fn new(term: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            language: language.into(),
            ..Default::default()
        }
    }
}

impl Record for Word {
    const COLLECTION: Collection = Collection::Words;

    fn normalize(&mut self) {
        self.term = self.term.trim().to_string();
        self.language = self.language.trim().to_lowercase();
        trim_optional(&mut self.definition);
        trim_optional(&mut self.pronunciation);
        trim_optional(&mut self.part_of_speech);
        trim_optional(&mut self.audio_url);
        self.examples.retain(|example| !example.trim().is_empty());
    }

    fn validate(&self) -> Result<(), ContentError> {
        require("term", &self.term)?;
        require("language", &self.language)
    }

    fn natural_key(&self) -> String {
        format!(
            "{}\u{1f}{}",
            self.language.trim().to_lowercase(),
            self.term.trim().to_lowercase()
        )
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.term.as_str()];
        fields.extend(self.definition.as_deref());
        fields.extend(self.pronunciation.as_deref());
        fields
    }

    fn label(&self) -> String {
        match &self.definition {
            Some(definition) => format!("{} [{}] {}", self.term, self.language, definition),
            None => format!("{} [{}]", self.term, self.language),
        }
    }

    fn entries(snapshot: &ContentSnapshot) -> &[Entry<Self>] {
        &snapshot.words
    }

    fn entries_mut(snapshot: &mut ContentSnapshot) -> &mut Vec<Entry<Self>> {
        &mut snapshot.words
    }
}

/// Script character from the learning reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    #[serde(default)]
    pub symbol: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_script")]
    pub script: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romanization: Option<String>,

    /// vowel, consonant, numeral, sign
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

fn default_script() -> String {
    DEFAULT_SCRIPT.to_string()
}

impl Character {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            script: default_script(),
            romanization: None,
            category: None,
            audio_url: None,
        }
    }
}

impl Record for Character {
    const COLLECTION: Collection = Collection::Characters;

    fn normalize(&mut self) {
        self.symbol = self.symbol.trim().to_string();
        self.name = self.name.trim().to_string();
        self.script = self.script.trim().to_lowercase();
        if self.script.is_empty() {
            self.script = default_script();
        }
        trim_optional(&mut self.romanization);
        trim_optional(&mut self.category);
        trim_optional(&mut self.audio_url);
    }

    fn validate(&self) -> Result<(), ContentError> {
        require("symbol", &self.symbol)?;
        require("name", &self.name)
    }

    fn natural_key(&self) -> String {
        format!("{}\u{1f}{}", self.script.trim().to_lowercase(), self.symbol.trim())
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.symbol.as_str(), self.name.as_str()];
        fields.extend(self.romanization.as_deref());
        fields
    }

    fn label(&self) -> String {
        match &self.romanization {
            Some(roman) => format!("{} {} ({})", self.symbol, self.name, roman),
            None => format!("{} {}", self.symbol, self.name),
        }
    }

    fn entries(snapshot: &ContentSnapshot) -> &[Entry<Self>] {
        &snapshot.characters
    }

    fn entries_mut(snapshot: &mut ContentSnapshot) -> &mut Vec<Entry<Self>> {
        &mut snapshot.characters
    }
}

fn require(field: &str, value: &str) -> Result<(), ContentError> {
    if value.trim().is_empty() {
        return Err(ContentError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn trim_optional(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
}
